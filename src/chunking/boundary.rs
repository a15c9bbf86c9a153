//! Break-point search for the windowing loop
//!
//! Every finder scans backward from the window end and returns a cut position
//! in `[lower, end]`: the exclusive end of the chunk being emitted.

/// Prose priority: blank line, then sentence end, then whitespace
pub(super) fn prose_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    paragraph_break(chars, lower, end)
        .or_else(|| sentence_break(chars, lower, end))
        .or_else(|| word_break(chars, lower, end))
}

/// Code priority: blank line, then the least-indented line start
pub(super) fn code_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    paragraph_break(chars, lower, end).or_else(|| indent_break(chars, lower, end))
}

/// Candidate character positions `i` whose cut `i + 1` lies in `[lower, end]`, latest first
fn candidates(lower: usize, end: usize) -> impl Iterator<Item = usize> {
    (lower.saturating_sub(1)..end).rev()
}

fn paragraph_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    candidates(lower, end)
        .find(|&i| chars[i] == '\n' && follows_blank_line(chars, i))
        .map(|i| i + 1)
}

/// True when the newline at `i` closes a line holding only whitespace
fn follows_blank_line(chars: &[char], i: usize) -> bool {
    let mut j = i;
    while j > 0 && matches!(chars[j - 1], ' ' | '\t' | '\r') {
        j -= 1;
    }
    j > 0 && chars[j - 1] == '\n'
}

fn sentence_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    candidates(lower, end)
        .find(|&i| {
            matches!(chars[i], '.' | '!' | '?')
                && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
        })
        .map(|i| i + 1)
}

fn word_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    // The window already ends on a boundary.
    if chars.get(end).is_some_and(|c| c.is_whitespace()) {
        return Some(end);
    }
    candidates(lower, end)
        .find(|&i| chars[i].is_whitespace())
        .map(|i| i + 1)
}

/// Line start with the shallowest indentation; the latest one wins ties
fn indent_break(chars: &[char], lower: usize, end: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for i in candidates(lower, end) {
        if chars[i] != '\n' {
            continue;
        }
        let line_start = i + 1;
        let indent = indentation(chars, line_start);
        match best {
            Some((_, best_indent)) if best_indent <= indent => {}
            _ => best = Some((line_start, indent)),
        }
    }

    best.map(|(pos, _)| pos)
}

/// Width of leading whitespace at `start`, tabs counting as four columns
fn indentation(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .take_while(|c| matches!(c, ' ' | '\t'))
        .map(|c| if *c == '\t' { 4 } else { 1 })
        .sum()
}
