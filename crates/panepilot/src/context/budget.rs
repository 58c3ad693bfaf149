//! Token estimation for budget decisions.
//!
//! Exact tokenization depends on the model, and the budget only needs to
//! know when history is getting close to the limit, so a character-ratio
//! estimate is enough.

use crate::agent::session::ChatMessage;

/// Characters per token. Most tokenizers average 3-4 chars per token on
/// English and shell output.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fraction of the context budget at which history is compressed.
pub const COMPRESSION_THRESHOLD: f64 = 0.80;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / DEFAULT_CHARS_PER_TOKEN).ceil() as usize
}

/// Whether the estimated size of `history` exceeds 80% of
/// `max_context_size` tokens.
pub fn needs_compression(history: &[ChatMessage], max_context_size: usize) -> bool {
    let total: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
    let threshold = (max_context_size as f64 * COMPRESSION_THRESHOLD) as usize;
    total > threshold
}
