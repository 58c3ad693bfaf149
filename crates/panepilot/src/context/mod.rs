//! Context window management: keeping the conversation under the model's
//! token budget.
//!
//! - [`budget`]: cheap token estimation and the 80% compression threshold.
//! - [`squash`]: model-assisted summarization of the middle of the history,
//!   preserving pinned leading messages and the in-flight user message.

pub mod budget;
pub mod squash;

pub use budget::{COMPRESSION_THRESHOLD, estimate_tokens, needs_compression};
pub use squash::{SquashReport, squash_history};
