//! Convenience re-exports for common `panepilot` types.
//!
//! ```ignore
//! use panepilot::prelude::*;
//! ```
//!
//! Pulls in what a front end needs to run a session: the model client,
//! the orchestrator and its session, the collaborator traits with their
//! production implementations, and the event handlers. Parsing helpers and
//! the reflection internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, OpenAiCompatClient, Provider};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::config::{AgentConfig, SessionOverrides};
pub use crate::agent::countdown::{Countdown, SleepCountdown};
pub use crate::agent::events::{AgentEvent, CompositeEventHandler, EventHandler, LoggingHandler, NoopHandler};
pub use crate::agent::orchestrator::Orchestrator;
pub use crate::agent::session::{ChatMessage, Session, SessionStatus, StatusCell};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::api::{ChatModel, CompletionError};
pub use crate::confirm::{CommandPolicy, Confirmation, Confirmer, TerminalConfirmer};
pub use crate::pane::tmux::TmuxClient;
pub use crate::pane::{Pane, PaneDetails};
pub use crate::terminal::TerminalCountdown;
