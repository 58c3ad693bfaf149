//! Terminal agent engine that watches tmux panes, asks an LLM what to do
//! next, and drives the answer back into the terminal.
//!
//! `panepilot` is the library half of the `panepilot` CLI. The core
//! abstraction is the [`Orchestrator`](agent::orchestrator::Orchestrator): a
//! turn loop that snapshots the panes of the current tmux window, sends them
//! to a chat model together with the conversation history, parses the
//! XML-tagged reply into an [`AiResponse`](agent::response::AiResponse), and
//! executes exactly one kind of effect (run a command, send keys, paste text,
//! wait, finish, or ask the user) after a human confirmation.
//!
//! # Where to find things
//!
//! - **Drive a conversation:** [`Orchestrator::process_message`](agent::orchestrator::Orchestrator::process_message)
//!   for one user request and [`Orchestrator::run_watch`](agent::orchestrator::Orchestrator::run_watch)
//!   for passive monitoring.
//! - **Talk to a model:** implement [`ChatModel`](api::ChatModel), or use
//!   [`OpenAiCompatClient`] for OpenRouter, OpenAI, and Azure OpenAI.
//! - **Talk to tmux:** implement [`Pane`](pane::Pane), or use
//!   [`TmuxClient`](pane::tmux::TmuxClient).
//! - **Ask the human:** implement [`Confirmer`](confirm::Confirmer), or use
//!   [`TerminalConfirmer`](confirm::TerminalConfirmer), which reads a raw-mode
//!   line with its own escape-sequence handling.
//! - **Keep history bounded:** [`context::squash`].
//! - **Learn from executed commands:** [`reflection`].
//! - **Observe what happens:** implement [`EventHandler`](agent::events::EventHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Session state, config, prompts, response parsing, events, the orchestrator |
//! | [`api`] | The [`ChatModel`](api::ChatModel) seam and retry policy |
//! | [`confirm`] | Whitelist policy, raw-mode line editor, escape disambiguation, external editor |
//! | [`context`] | Token estimation and history squashing |
//! | [`pane`] | The [`Pane`](pane::Pane) seam, tmux client, key tokenizing, prepared mode, snapshots |
//! | [`reflection`] | Post-execution critique queue, bounded log, tool manifest |
//! | [`terminal`] | Raw-mode guard, polled stdin, busy-wait countdown |

pub mod agent;
pub mod api;
pub mod confirm;
pub mod context;
pub mod pane;
pub mod prelude;
pub mod reflection;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use api::retry::{ApiError, RetryPolicy, parse_retry_after};
use api::{ChatModel, CompletionError};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when the config names none.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-preview";

/// Default Azure OpenAI API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2025-04-01-preview";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message as sent over the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// ── Request / response types ───────────────────────────────────────

/// Chat completion request body (OpenAI-compatible).
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Provider ───────────────────────────────────────────────────────

/// Which OpenAI-compatible endpoint family a client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenRouter {
        base_url: String,
    },
    OpenAi {
        base_url: String,
    },
    Azure {
        api_base: String,
        api_version: String,
        deployment: String,
    },
}

impl Provider {
    /// Human-readable provider name used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenRouter { .. } => "OpenRouter",
            Provider::OpenAi { .. } => "OpenAI",
            Provider::Azure { .. } => "Azure OpenAI",
        }
    }

    /// Full URL of the chat completions endpoint.
    pub fn endpoint(&self) -> String {
        match self {
            Provider::OpenRouter { base_url } | Provider::OpenAi { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Provider::Azure {
                api_base,
                api_version,
                deployment,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                api_base.trim_end_matches('/')
            ),
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    pub(crate) client: reqwest::Client,
    pub(crate) provider: Provider,
    pub(crate) api_key: String,
    pub(crate) retry: RetryPolicy,
}

impl OpenAiCompatClient {
    /// Create a client for `provider` authenticated with `api_key`.
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("panepilot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            provider,
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy for transient failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Send one chat completion request and return the first choice's text.
    pub async fn chat(&self, body: &ChatRequest) -> Result<String, ApiError> {
        let label = self.provider.label();
        debug!(
            "LLM request: provider={}, model={}, messages={}",
            label,
            body.model,
            body.messages.len()
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let request = self.client.post(self.provider.endpoint()).json(body);
        let request = match self.provider {
            Provider::Azure { .. } => request.header("api-key", &self.api_key),
            Provider::OpenRouter { .. } => request
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("X-Title", "panepilot"),
            Provider::OpenAi { .. } => {
                request.header("Authorization", format!("Bearer {}", self.api_key))
            }
        };

        let resp = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ApiError::Http {
                provider: label,
                status: status.as_u16(),
                retry_after,
                body: text,
            });
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::Response(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ApiError::Response(format!("{label} API error: {}", err.message)));
        }

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::Response(format!("{label} API returned no choices")))
    }

    /// [`chat`](Self::chat), retried as the [`RetryPolicy`] allows.
    pub async fn chat_with_retry(&self, body: &ChatRequest) -> Result<String, ApiError> {
        let mut attempt = 0;
        loop {
            let err = match self.chat(body).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            let Some(delay) = self.retry.next_delay(attempt, &err) else {
                return Err(err);
            };
            warn!(
                "Transient LLM error (attempt {}/{}), retrying in {:?}: {err}",
                attempt + 1,
                self.retry.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl ChatModel for OpenAiCompatClient {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, CompletionError>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: model.to_string(),
                messages: messages.to_vec(),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CompletionError::Cancelled),
                result = self.chat_with_retry(&body) => {
                    result.map_err(|e| CompletionError::Failed(e.to_string()))
                }
            }
        })
    }
}
