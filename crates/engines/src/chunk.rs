//! Text chunking shared by embedding and map-reduce summarization.

/// Largest chunk handed to the embedding collaborator, in characters.
pub const EMBEDDING_MAX_PROMPT_CHARS: usize = 7500;

/// Overlap carried between consecutive chunks so sentences spanning a
/// boundary stay searchable.
pub const CHUNK_OVERLAP_CHARS: usize = 200;

/// Split `text` into chunks of at most `max_chars` characters with
/// `overlap` characters carried over between neighbors.
///
/// Boundaries prefer the last paragraph or sentence break inside the
/// window, falling back to a hard cut. Operates on char boundaries, never
/// splitting a code point.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 || chars.len() <= max_chars {
        return vec![text.to_string()];
    }
    let overlap = overlap.min(max_chars / 2);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let hard_end = (start + max_chars).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_break(&chars, start, hard_end)
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Best split point in `window..end`: paragraph break, then sentence end,
/// then whitespace, then the hard limit.
fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let window_floor = start + (hard_end - start) / 2;

    let mut sentence = None;
    let mut whitespace = None;
    let mut i = hard_end;
    while i > window_floor {
        i -= 1;
        match chars[i] {
            '\n' if i > 0 && chars[i - 1] == '\n' => return i + 1,
            '.' | '!' | '?' if sentence.is_none() => sentence = Some(i + 1),
            c if c.is_whitespace() && whitespace.is_none() => whitespace = Some(i + 1),
            _ => {}
        }
    }
    sentence.or(whitespace).unwrap_or(hard_end)
}
