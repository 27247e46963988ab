//! Token-count heuristic shared by chunking, summarization and budgeting.
//!
//! This is an estimate, not a tokenizer: word count plus a fudge of one token per five bytes
//! for punctuation and symbols. Every size decision in the pipeline uses the same estimate, so
//! budgets stay self-consistent even when the model's real tokenizer disagrees.

pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() + text.len() / 5
}

/// Split `text` on line boundaries into pieces whose estimate stays within `limit`.
///
/// Lines are accumulated until adding the next one would exceed the limit, then the buffer is
/// flushed. A single line larger than `limit` becomes its own (oversized) chunk. Never returns
/// empty chunks; returns nothing for blank input.
pub fn chunk_by_tokens(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    for line in text.lines() {
        if !buf.is_empty() && estimate_tokens(&format!("{buf}{line}\n")) > limit {
            chunks.push(std::mem::take(&mut buf));
        }
        buf.push_str(line);
        buf.push('\n');
    }
    if buf.chars().any(|c| !c.is_whitespace()) {
        chunks.push(buf);
    }
    chunks.retain(|c| c.chars().any(|ch| !ch.is_whitespace()));
    chunks
}

/// Split a chunk that is still over `limit` (typically one long line) on word boundaries.
pub fn split_oversized(chunk: &str, limit: usize) -> Vec<String> {
    if estimate_tokens(chunk) <= limit {
        return vec![chunk.to_string()];
    }
    let mut out = Vec::new();
    let mut buf = String::new();
    for word in chunk.split_whitespace() {
        if !buf.is_empty() && estimate_tokens(&format!("{buf} {word}")) > limit {
            out.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(word);
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// `percent` of a context window, in tokens. Zero for non-positive inputs.
pub fn context_portion(context_window: usize, percent: f64) -> usize {
    if context_window == 0 || percent <= 0.0 {
        return 0;
    }
    (context_window as f64 * (percent / 100.0)) as usize
}
