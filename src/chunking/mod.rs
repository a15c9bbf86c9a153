//! Boundary-aware text chunking
//!
//! Splits raw document text into overlapping, position-tracked windows that
//! are small enough to embed. Three variants share one windowing loop:
//! - prose: paragraph → sentence → word → hard cut
//! - code: blank line → shallowest-indent line start → hard cut
//! - paragraphs: packs blank-line delimited paragraphs, subdividing only oversize ones

mod boundary;
mod paragraphs;

pub use paragraphs::{chunk_paragraphs, split_paragraphs};

use serde::{Deserialize, Serialize};

/// Default window size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive windows in characters
pub const DEFAULT_OVERLAP: usize = 200;

/// A contiguous window of a source text
///
/// Offsets are character (not byte) offsets into the source, half-open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Trimmed text of the window
    pub content: String,
    /// First character of `content` in the source
    pub start_offset: usize,
    /// One past the last character of `content` in the source
    pub end_offset: usize,
    /// Position of this chunk within its document (0-based)
    pub index: usize,
}

impl Chunk {
    /// Length of the chunk in characters
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Boundary detection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Natural-language text
    #[default]
    Prose,
    /// Source code; sentence punctuation is ignored
    Code,
    /// Blank-line delimited paragraphs packed up to the size limit
    Paragraphs,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prose" | "text" => Ok(Self::Prose),
            "code" => Ok(Self::Code),
            "paragraphs" | "structured" => Ok(Self::Paragraphs),
            other => Err(format!(
                "unknown chunk strategy '{}': expected prose, code or paragraphs",
                other
            )),
        }
    }
}

/// Configured chunker
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    strategy: ChunkStrategy,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP)
    }
}

impl Chunker {
    /// Create a prose chunker. A zero `chunk_size` is treated as 1.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
            strategy: ChunkStrategy::Prose,
        }
    }

    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Split `text` using the configured strategy
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        match self.strategy {
            ChunkStrategy::Prose => {
                windowed(text, self.chunk_size, self.overlap, boundary::prose_break)
            }
            ChunkStrategy::Code => {
                windowed(text, self.chunk_size, self.overlap, boundary::code_break)
            }
            ChunkStrategy::Paragraphs => {
                paragraphs::chunk_text_paragraphs(text, self.chunk_size, self.overlap)
            }
        }
    }
}

/// Split natural-language text into overlapping chunks
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(chunk_size, overlap).chunk(text)
}

/// Split source code into overlapping chunks
pub fn chunk_code(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(chunk_size, overlap)
        .with_strategy(ChunkStrategy::Code)
        .chunk(text)
}

/// Finds a cut position in `[lower, end]`, or `None` for a hard cut
type BreakFinder = fn(&[char], usize, usize) -> Option<usize>;

/// Sliding-window loop shared by the prose and code strategies
fn windowed(text: &str, chunk_size: usize, overlap: usize, find_break: BreakFinder) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();

    if total <= chunk_size {
        push_trimmed(&mut chunks, &chars, 0, total);
        return chunks;
    }

    // Breaks are only accepted in the back half of a window, and the next
    // window always starts at least this far past the current one.
    let min_advance = (chunk_size / 2).max(1);
    let mut start = 0;

    while start < total {
        let window_end = (start + chunk_size).min(total);
        let cut = if window_end < total {
            find_break(&chars, start + min_advance, window_end).unwrap_or(window_end)
        } else {
            window_end
        };

        push_trimmed(&mut chunks, &chars, start, cut);

        if cut >= total {
            break;
        }

        start = cut.saturating_sub(overlap).max(start + min_advance);
    }

    chunks
}

/// Append `chars[start..end]` with surrounding whitespace removed; blank windows are skipped
pub(crate) fn push_trimmed(chunks: &mut Vec<Chunk>, chars: &[char], start: usize, end: usize) {
    let window = &chars[start..end];
    let Some(lead) = window.iter().position(|c| !c.is_whitespace()) else {
        return;
    };
    let trail = window
        .iter()
        .rposition(|c| !c.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(window.len());

    chunks.push(Chunk {
        content: window[lead..trail].iter().collect(),
        start_offset: start + lead,
        end_offset: start + trail,
        index: chunks.len(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_blank() {
        assert!(chunk("", 100, 10).is_empty());
        assert!(chunk("   \n\t  ", 100, 10).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk("Short text.", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Short text.");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 11);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_hard_cut_run_of_same_char() {
        let text = "a".repeat(2000);
        let chunks = chunk(&text, 500, 100);

        assert!((4..=5).contains(&chunks.len()), "got {}", chunks.len());
        for c in &chunks {
            assert!(c.char_len() <= 500);
        }
        for pair in chunks.windows(2) {
            let overlap = pair[0].end_offset - pair[1].start_offset;
            assert_eq!(overlap, 100);
        }
        assert_eq!(chunks.last().map(|c| c.end_offset), Some(2000));
    }

    #[test]
    fn test_prefers_sentence_end() {
        let text = "First sentence here. Second sentence goes on and on without stopping";
        let chunks = chunk(text, 40, 0);
        assert_eq!(chunks[0].content, "First sentence here.");
    }

    #[test]
    fn test_prefers_paragraph_over_sentence() {
        let text = "Alpha beta. Gamma delta.\n\nEpsilon zeta eta theta iota kappa lambda";
        let chunks = chunk(text, 40, 0);
        assert_eq!(chunks[0].content, "Alpha beta. Gamma delta.");
    }

    #[test]
    fn test_word_boundary_when_no_sentence() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do";
        let chunks = chunk(text, 20, 0);
        for c in &chunks {
            assert!(!c.content.starts_with(' '));
            assert!(text.contains(&c.content));
        }
        // No word is split across a cut when spaces are available.
        assert_eq!(chunks[0].content, "lorem ipsum dolor");
    }

    #[test]
    fn test_overlap_larger_than_chunk_terminates() {
        let text = "word ".repeat(200);
        let chunks = chunk(&text, 30, 500);
        assert!(!chunks.is_empty());
        assert!(chunks.len() < text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn test_offsets_match_content() {
        let text = "Ünïcödé text. More wörds follow here! And then some more text to split up.";
        let chars: Vec<char> = text.chars().collect();
        for c in chunk(text, 25, 5) {
            let slice: String = chars[c.start_offset..c.end_offset].iter().collect();
            assert_eq!(slice, c.content);
        }
    }

    #[test]
    fn test_indices_monotonic() {
        let text = "Some sentence. ".repeat(100);
        let chunks = chunk(&text, 100, 20);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_code_ignores_sentence_punctuation() {
        let text = "fn main() {\n    let x = 1.0; // done. really!\n    println!(\"{}\", x);\n}\n\nfn other() {\n    todo();\n}\n";
        let chunks = chunk_code(text, 80, 0);
        assert!(chunks[0].content.starts_with("fn main()"));
        assert!(chunks[0].content.ends_with('}'));
        assert!(chunks.iter().any(|c| c.content.starts_with("fn other()")));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("code".parse::<ChunkStrategy>(), Ok(ChunkStrategy::Code));
        assert_eq!("Prose".parse::<ChunkStrategy>(), Ok(ChunkStrategy::Prose));
        assert!("words".parse::<ChunkStrategy>().is_err());
    }
}
