//! The agent: session state, configuration, prompts, response parsing,
//! events, and the orchestration loop that ties them together.
//!
//! - [`session`]: the single mutable [`Session`](session::Session) owned by
//!   the orchestration task, plus the lock-guarded [`StatusCell`](session::StatusCell)
//!   shared with the interrupt path.
//! - [`config`]: [`AgentConfig`](config::AgentConfig) loaded from JSON and the
//!   environment, and ephemeral [`SessionOverrides`](config::SessionOverrides).
//! - [`prompts`]: leading system prompts for default, prepared, and watch mode.
//! - [`response`]: XML-tag parsing into [`AiResponse`](response::AiResponse)
//!   and the guideline check.
//! - [`events`]: [`AgentEvent`](events::AgentEvent) and handlers.
//! - [`countdown`]: the busy-wait [`Countdown`](countdown::Countdown) seam.
//! - [`orchestrator`]: the turn loop.

pub mod config;
pub mod countdown;
pub mod events;
pub mod orchestrator;
pub mod prompts;
pub mod response;
pub mod session;
