//! History squashing: replace the middle of the conversation with a
//! model-written summary.
//!
//! The first message is pinned when it is not from the user (a base
//! prompt), and the second is pinned when it is also not from the user and
//! the first was pinned (a baseline assistant message). Everything after the
//! pins, except the final message, is summarized. The final message is the
//! in-flight request and must survive verbatim.
//!
//! Squashing is best-effort. If the model call fails the history is left
//! exactly as it was.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Message;
use crate::agent::session::ChatMessage;
use crate::api::ChatModel;
use crate::context::budget::estimate_tokens;

/// Prefix of the message that replaces the summarized span.
pub const SUMMARY_PREFIX: &str = "CHAT HISTORY SUMMARY:\n";

const SUMMARIZATION_PROMPT: &str = "\
Below is a chat history between a user and an assistant. Please provide a concise summary of \
the key points, decisions, and context from this conversation. Focus on the most important \
information that would be needed to continue the conversation effectively:\n\n";

/// Outcome of a successful squash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashReport {
    /// Number of messages folded into the summary.
    pub summarized: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Number of leading messages protected from summarization (0, 1, or 2).
pub fn pinned_prefix_len(history: &[ChatMessage]) -> usize {
    match history {
        [first, second, ..] if !first.from_user && !second.from_user => 2,
        [first, ..] if !first.from_user => 1,
        _ => 0,
    }
}

/// Render `span` as a role-tagged transcript.
pub fn build_transcript(span: &[ChatMessage]) -> String {
    let mut transcript = String::new();
    for msg in span {
        let role = if msg.from_user { "User" } else { "Assistant" };
        transcript.push_str(&format!("[{role}]: {}\n\n", msg.content));
    }
    transcript
}

/// Summarize everything between the pinned prefix and the final message.
///
/// Returns `Ok(None)` when there is nothing to summarize. On error the
/// history is untouched.
pub async fn squash_history(
    history: &mut Vec<ChatMessage>,
    model: &dyn ChatModel,
    model_name: &str,
    cancel: &CancellationToken,
) -> Result<Option<SquashReport>, String> {
    let start = pinned_prefix_len(history);
    if start + 1 >= history.len() {
        debug!(
            "Squash skipped: {} message(s), {} pinned",
            history.len(),
            start
        );
        return Ok(None);
    }

    let end = history.len() - 1;
    let tokens_before: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
    let prompt = format!("{SUMMARIZATION_PROMPT}{}", build_transcript(&history[start..end]));

    let summary = model
        .complete(model_name, &[Message::user(prompt)], cancel)
        .await
        .map_err(|e| format!("Failed to summarize chat history: {e}"))?;

    let mut squashed: Vec<ChatMessage> = history[..start].to_vec();
    squashed.push(ChatMessage::assistant(format!("{SUMMARY_PREFIX}{summary}")));
    *history = squashed;

    let tokens_after: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
    info!(
        summarized = end - start,
        tokens_before, tokens_after, "Chat history squashed"
    );
    Ok(Some(SquashReport {
        summarized: end - start,
        tokens_before,
        tokens_after,
    }))
}
