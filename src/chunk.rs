//! Overlapping sliding-window text chunker.
//!
//! Splits extracted text into windows sized by an approximate token budget
//! (converted at a fixed chars-per-token ratio). A chunk prefers to end at a
//! sentence or line boundary within the tail half of its window so cuts do
//! not land mid-sentence. Consecutive windows overlap by `overlap_tokens`.
//!
//! The degenerate case `overlap >= size` is rejected at the config boundary;
//! the loop additionally clamps its step to guarantee forward progress no
//! matter what parameters reach it.

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunks shorter than this are discarded as noise.
pub const MIN_CHUNK_CHARS: usize = 20;

/// One window of source text, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub index: i64,
    pub text: String,
    pub token_estimate: i64,
}

/// Split `text` into overlapping windows of roughly `chunk_tokens` tokens.
///
/// Input shorter than one window yields exactly one trimmed chunk, or zero
/// chunks if it falls below [`MIN_CHUNK_CHARS`]. Indices are contiguous
/// starting at 0.
pub fn chunk_text(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<ChunkSpan> {
    let window = chunk_tokens.max(1) * CHARS_PER_TOKEN;
    // Clamp so the window always advances, even if a caller bypassed config
    // validation with overlap >= size.
    let overlap = (overlap_tokens * CHARS_PER_TOKEN).min(window.saturating_sub(1));

    let text = text.trim();
    let mut chunks = Vec::new();

    if text.is_empty() {
        return chunks;
    }

    let len = text.len();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < len {
        let hard_end = ceil_char_boundary(text, (start + window).min(len));

        // Prefer a sentence or line boundary in the tail half of the window,
        // but only when the window is not the final one. A break is usable
        // only if the window after it still advances past `start`; otherwise
        // a break landing inside the overlap region would stall the stride.
        let end = if hard_end < len {
            let mid = ceil_char_boundary(text, start + (hard_end - start) / 2);
            find_break(&text[mid..hard_end])
                .map(|off| mid + off)
                .filter(|&e| e > start + overlap)
                .unwrap_or(hard_end)
        } else {
            hard_end
        };

        let piece = text[start..end].trim();
        if piece.len() >= MIN_CHUNK_CHARS {
            chunks.push(ChunkSpan {
                index,
                text: piece.to_string(),
                token_estimate: (piece.len().div_ceil(CHARS_PER_TOKEN)) as i64,
            });
            index += 1;
        }

        if end >= len {
            break;
        }

        // Next window starts `overlap` chars before this chunk's end.
        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            // Forward-progress guarantee: advance by the full stride.
            next = ceil_char_boundary(text, start + (window - overlap).max(1));
        }
        start = next;
    }

    chunks
}

/// Byte offset just past the last sentence end or newline in `window`,
/// or `None` when the window has no usable boundary.
fn find_break(window: &str) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut prev: Option<(usize, char)> = None;

    for (pos, ch) in window.char_indices() {
        if ch == '\n' {
            best = Some(pos + ch.len_utf8());
        } else if ch.is_whitespace() {
            if let Some((ppos, pch)) = prev {
                if matches!(pch, '.' | '!' | '?') {
                    best = Some(ppos + pch.len_utf8());
                }
            }
        }
        prev = Some((pos, ch));
    }

    best
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
