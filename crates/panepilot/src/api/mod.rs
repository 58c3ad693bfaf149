//! The model collaborator seam.
//!
//! The orchestrator, the squasher, and the reflection pipeline all talk to
//! an LLM through [`ChatModel`]. Production code uses
//! [`OpenAiCompatClient`](crate::OpenAiCompatClient); tests script replies
//! with a plain struct implementing the trait.
//!
//! - [`retry`]: typed request errors and the retry policy.

pub mod retry;

pub use retry::{ApiError, RetryPolicy};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::Message;
use crate::agent::session::ChatMessage;

/// Why a completion produced no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The cancellation token fired before the model answered.
    Cancelled,
    /// Transport, HTTP, or decoding failure.
    Failed(String),
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionError::Cancelled => write!(f, "request cancelled"),
            CompletionError::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// A chat model that turns an ordered message list into free text.
///
/// Methods return boxed futures so the trait stays dyn-compatible and can be
/// shared as `Arc<dyn ChatModel>` between the orchestrator and background
/// work.
pub trait ChatModel: Send + Sync {
    /// Complete `messages` with `model`. Must resolve to
    /// [`CompletionError::Cancelled`] promptly once `cancel` fires.
    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, CompletionError>>;
}

/// Convert chat history into wire messages using positional roles: the first
/// message is `system` when it is not from the user, later user messages are
/// `user`, and everything else is `assistant`.
pub fn role_messages(history: &[ChatMessage]) -> Vec<Message> {
    history
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            if i == 0 && !msg.from_user {
                Message::system(&msg.content)
            } else if msg.from_user {
                Message::user(&msg.content)
            } else {
                Message::assistant(&msg.content)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    #[test]
    fn roles_are_positional() {
        let history = vec![
            ChatMessage::assistant("base prompt"),
            ChatMessage::user("list files"),
            ChatMessage::assistant("<ExecCommand>ls</ExecCommand>"),
            ChatMessage::user("thanks"),
        ];
        let roles: Vec<MessageRole> = role_messages(&history).iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
    }

    #[test]
    fn leading_user_message_stays_user() {
        let history = vec![ChatMessage::user("summarize this")];
        assert_eq!(role_messages(&history)[0].role, MessageRole::User);
    }

    #[test]
    fn later_non_user_messages_are_assistant() {
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("CHAT HISTORY SUMMARY:\n..."),
        ];
        assert_eq!(role_messages(&history)[1].role, MessageRole::Assistant);
    }

    #[test]
    fn cancelled_error_displays() {
        assert_eq!(CompletionError::Cancelled.to_string(), "request cancelled");
        assert_eq!(
            CompletionError::Failed("boom".into()).to_string(),
            "boom"
        );
    }
}
