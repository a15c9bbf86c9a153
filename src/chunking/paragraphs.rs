//! Structure-aware chunking over pre-delimited paragraphs

use super::{chunk, Chunk};

/// Separator assumed between caller-supplied paragraphs
const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Split text on blank lines into paragraphs, dropping blank ones
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}

/// Pack whole paragraphs into chunks of at most `max_chunk_size` characters
///
/// Offsets refer to the paragraphs joined with a blank line, and a packed
/// chunk's content is exactly that span of the joined text. Only a paragraph
/// that alone exceeds the limit is subdivided (with `overlap`); packed chunks
/// never overlap each other.
pub fn chunk_paragraphs<S: AsRef<str>>(
    paragraphs: &[S],
    max_chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let mut joined: Vec<char> = Vec::new();
    let mut spans = Vec::with_capacity(paragraphs.len());

    for (i, paragraph) in paragraphs.iter().enumerate() {
        if i > 0 {
            joined.extend(PARAGRAPH_SEPARATOR.chars());
        }
        let para_start = joined.len();
        joined.extend(paragraph.as_ref().chars());
        if let Some(span) = trimmed_span(&joined, para_start, joined.len()) {
            spans.push(span);
        }
    }

    pack(&joined, &spans, max_chunk_size, overlap)
}

/// Paragraph packing over the source text itself
///
/// Same packing as [`chunk_paragraphs`], but offsets index `text` and a
/// packed chunk keeps the source's own separators between its paragraphs.
pub(crate) fn chunk_text_paragraphs(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let spans = paragraph_spans(&chars);
    pack(&chars, &spans, max_chunk_size, overlap)
}

/// Trimmed spans of the blank-line delimited paragraphs of `chars`
fn paragraph_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut line_start = 0;

    while line_start < chars.len() {
        let line_end = chars[line_start..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(chars.len(), |i| line_start + i);

        match (trimmed_span(chars, line_start, line_end), current) {
            (None, _) => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
            }
            (Some((_, end)), Some((start, _))) => current = Some((start, end)),
            (Some(span), None) => current = Some(span),
        }

        line_start = line_end + 1;
    }

    spans.extend(current);
    spans
}

/// `[start, end)` shrunk to its non-whitespace core, if any
fn trimmed_span(chars: &[char], start: usize, end: usize) -> Option<(usize, usize)> {
    let window = &chars[start..end];
    let lead = window.iter().position(|c| !c.is_whitespace())?;
    let trail = window.iter().rposition(|c| !c.is_whitespace())?;
    Some((start + lead, start + trail + 1))
}

fn pack(chars: &[char], spans: &[(usize, usize)], max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let max_chunk_size = max_chunk_size.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut packed: Option<(usize, usize)> = None;

    for &(start, end) in spans {
        if end - start > max_chunk_size {
            flush(&mut chunks, chars, packed.take());
            let content: String = chars[start..end].iter().collect();
            for piece in chunk(&content, max_chunk_size, overlap) {
                chunks.push(Chunk {
                    content: piece.content,
                    start_offset: start + piece.start_offset,
                    end_offset: start + piece.end_offset,
                    index: chunks.len(),
                });
            }
            continue;
        }

        packed = match packed {
            Some((packed_start, _)) if end - packed_start <= max_chunk_size => Some((packed_start, end)),
            previous => {
                flush(&mut chunks, chars, previous);
                Some((start, end))
            }
        };
    }

    flush(&mut chunks, chars, packed);
    chunks
}

/// Emit the packed span `[start, end)` of `chars` as one chunk
fn flush(chunks: &mut Vec<Chunk>, chars: &[char], span: Option<(usize, usize)>) {
    if let Some((start, end)) = span {
        chunks.push(Chunk {
            content: chars[start..end].iter().collect(),
            start_offset: start,
            end_offset: end,
            index: chunks.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_paragraphs() {
        let text = "first line\nstill first\n\n  \nsecond\n\n\nthird";
        let paragraphs = split_paragraphs(text);
        assert_eq!(paragraphs, vec!["first line\nstill first", "second", "third"]);
    }

    #[test]
    fn test_packs_small_paragraphs_together() {
        let paragraphs = ["aaaa", "bbbb", "cccc"];
        let chunks = chunk_paragraphs(&paragraphs, 10, 0);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "aaaa\n\nbbbb");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 10);
        assert_eq!(chunks[1].content, "cccc");
        assert_eq!(chunks[1].start_offset, 12);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_subdivides_only_oversize_paragraph() {
        let long = "word ".repeat(20);
        let paragraphs = vec!["intro".to_string(), long.trim().to_string(), "outro".to_string()];
        let chunks = chunk_paragraphs(&paragraphs, 30, 5);

        assert_eq!(chunks[0].content, "intro");
        assert_eq!(chunks.last().map(|c| c.content.as_str()), Some("outro"));
        assert!(chunks.len() > 3);
        for c in &chunks {
            assert!(c.content.chars().count() <= 30);
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_source_offsets_survive_blank_runs_and_indent() {
        let text = "Intro line\n\n\n\n  Second paragraph here";
        let chars: Vec<char> = text.chars().collect();
        let chunks = chunk_text_paragraphs(text, 12, 0);

        assert_eq!(chunks[0].content, "Intro line");
        assert_eq!(chunks[1].start_offset, 16);
        assert!(chunks[1].content.starts_with("Second"));
        for c in &chunks {
            let slice: String = chars[c.start_offset..c.end_offset].iter().collect();
            assert_eq!(slice, c.content);
            assert!(c.char_len() <= 12);
        }
    }

    #[test]
    fn test_source_packing_keeps_original_separators() {
        let text = "alpha\n \n\nbeta\n\ngamma delta epsilon";
        let chunks = chunk_text_paragraphs(text, 14, 0);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha\n \n\nbeta", "gamma delta", "epsilon"]);
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 13));
    }

    #[test]
    fn test_blank_paragraphs_skipped() {
        let paragraphs = ["", "   ", "real"];
        let chunks = chunk_paragraphs(&paragraphs, 100, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "real");
        assert_eq!(chunks[0].start_offset, 7);
    }
}
