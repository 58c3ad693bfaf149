//! Events emitted by the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! The orchestrator never prints. Everything the user should see is
//! reported as an [`AgentEvent`] to an [`EventHandler`], so the CLI can
//! render to the terminal, tests can record, and logs can capture the same
//! stream.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests and headless runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`CompositeEventHandler`] | Fan out to several handlers in order |
//! | Custom `impl EventHandler` | Console rendering |

use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// User-visible occurrences during a request.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// History is over the context budget and is being summarized.
    SquashStarted,
    SquashFinished {
        summarized: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    SquashFailed(&'a str),
    /// The model call failed (not cancelled).
    ModelError(&'a str),
    /// The reply could not be parsed.
    ParseError(&'a str),
    /// The reply broke the response format and the model is asked again.
    GuidelineRetry { attempt: u32, violation: &'a str },
    /// Too many consecutive format violations; the request is abandoned.
    GuidelineLimitReached { attempts: u32 },
    /// Too many follow-up turns within one request.
    ContinuationLimitReached { max: u32 },
    /// Free text from the model.
    Message(&'a str),
    /// A command the model wants to run, before confirmation.
    CommandProposed(&'a str),
    CommandExecuting(&'a str),
    /// A prepared-mode command finished.
    CommandFinished { command: &'a str, code: i32 },
    /// The keys the model wants to send, before confirmation.
    KeysPreview(&'a [String]),
    SendingKeys(&'a str),
    /// Multiline content the model wants to paste, before confirmation.
    PastePreview(&'a str),
    Pasting,
    /// The request was interrupted.
    Cancelled,
    /// Formatted outcome of one command reflection.
    ReflectionSummary(&'a str),
    /// Any other one-line status message.
    Notice(&'a str),
}

/// Observer for [`AgentEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Logs events through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::SquashStarted => info!("Squashing chat history"),
            AgentEvent::SquashFinished {
                summarized,
                tokens_before,
                tokens_after,
            } => info!(
                summarized,
                tokens_before, tokens_after, "Chat history squashed"
            ),
            AgentEvent::SquashFailed(e) => warn!("Squash failed: {e}"),
            AgentEvent::ModelError(e) => warn!("Model error: {e}"),
            AgentEvent::ParseError(e) => warn!("Parse error: {e}"),
            AgentEvent::GuidelineRetry { attempt, violation } => {
                debug!(attempt, "Guideline violation: {violation}")
            }
            AgentEvent::GuidelineLimitReached { attempts } => {
                warn!(attempts, "Guideline retry limit reached")
            }
            AgentEvent::ContinuationLimitReached { max } => {
                warn!(max, "Continuation limit reached")
            }
            AgentEvent::Message(text) => debug!("Model message: {text}"),
            AgentEvent::CommandProposed(cmd) => debug!("Command proposed: {cmd}"),
            AgentEvent::CommandExecuting(cmd) => info!("Executing command: {cmd}"),
            AgentEvent::CommandFinished { command, code } => {
                info!(code, "Command finished: {command}")
            }
            AgentEvent::KeysPreview(keys) => debug!(count = keys.len(), "Keys proposed"),
            AgentEvent::SendingKeys(keys) => info!("Sending keys: {keys}"),
            AgentEvent::PastePreview(content) => {
                debug!(bytes = content.len(), "Paste proposed")
            }
            AgentEvent::Pasting => info!("Pasting multiline content"),
            AgentEvent::Cancelled => info!("Operation cancelled"),
            AgentEvent::ReflectionSummary(summary) => debug!("{summary}"),
            AgentEvent::Notice(text) => info!("{text}"),
        }
    }
}

/// Dispatches each event to every inner handler in registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}
