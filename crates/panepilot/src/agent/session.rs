//! The single mutable session owned by the orchestration task.
//!
//! A [`Session`] holds everything one chat pane accumulates: the message
//! history, the exec pane it drives, the reflection queue and log, and the
//! session-only overrides. It is moved into the orchestration task for the
//! duration of a request and handed back afterwards, so nothing else can
//! touch it mid-turn.
//!
//! The one exception is [`StatusCell`]. The interrupt path clears status
//! while the task may still be unwinding, so status lives behind its own
//! lock and is shared by cloning the cell.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Provider;
use crate::agent::config::{AgentConfig, ModelConfig, SessionOverrides};
use crate::context::budget::estimate_tokens;
use crate::pane::PaneDetails;
use crate::pane::prepared::CommandExecHistory;
use crate::reflection::ReflectionPipeline;

// ── Status ─────────────────────────────────────────────────────────

/// Coarse session state shown in the chat prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// No request in flight.
    #[default]
    Idle,
    /// A request is being processed.
    Running,
    /// The model asked the user a question.
    Waiting,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "",
            SessionStatus::Running => "running",
            SessionStatus::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-guarded session status.
#[derive(Debug, Clone, Default)]
pub struct StatusCell(Arc<Mutex<SessionStatus>>);

impl StatusCell {
    pub fn get(&self) -> SessionStatus {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, status: SessionStatus) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn clear(&self) {
        self.set(SessionStatus::Idle);
    }

    pub fn is_idle(&self) -> bool {
        self.get() == SessionStatus::Idle
    }
}

// ── Chat messages ──────────────────────────────────────────────────

/// One entry of the conversation history. Order is turn order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub from_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: true,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: false,
            timestamp: Utc::now(),
        }
    }
}

// ── Session ────────────────────────────────────────────────────────

/// All mutable state of one chat session.
#[derive(Debug)]
pub struct Session {
    pub config: AgentConfig,
    pub overrides: SessionOverrides,
    pub status: StatusCell,
    pub watch_mode: bool,
    pub history: Vec<ChatMessage>,
    /// The pane the chat itself runs in. Never captured or driven.
    pub chat_pane_id: String,
    /// The pane commands and keys are sent to.
    pub exec_pane: PaneDetails,
    /// Commands parsed from the exec pane after `/prepare`.
    pub exec_history: Vec<CommandExecHistory>,
    pub reflections: ReflectionPipeline,
}

impl Session {
    pub fn new(config: AgentConfig, chat_pane_id: impl Into<String>) -> Self {
        let reflections = ReflectionPipeline::new(config.reflection_log_path());
        Self {
            config,
            overrides: SessionOverrides::default(),
            status: StatusCell::default(),
            watch_mode: false,
            history: Vec::new(),
            chat_pane_id: chat_pane_id.into(),
            exec_pane: PaneDetails::default(),
            exec_history: Vec::new(),
            reflections,
        }
    }

    /// Append a (turn input, model reply) pair to history.
    pub fn push_exchange(&mut self, input: ChatMessage, reply: ChatMessage) {
        self.history.push(input);
        self.history.push(reply);
    }

    /// Estimated token count of the whole history.
    pub fn history_tokens(&self) -> usize {
        self.history.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    // ── Effective settings (override first, then config) ──

    pub fn max_capture_lines(&self) -> usize {
        self.overrides
            .get_u64("max_capture_lines")
            .map_or(self.config.max_capture_lines, |v| v as usize)
    }

    pub fn max_context_size(&self) -> usize {
        self.overrides
            .get_u64("max_context_size")
            .map_or(self.config.max_context_size, |v| v as usize)
    }

    pub fn wait_interval(&self) -> u64 {
        self.overrides
            .get_u64("wait_interval")
            .unwrap_or(self.config.wait_interval)
    }

    pub fn exec_confirm(&self) -> bool {
        self.overrides
            .get_bool("exec_confirm")
            .unwrap_or(self.config.exec_confirm)
    }

    pub fn send_keys_confirm(&self) -> bool {
        self.overrides
            .get_bool("send_keys_confirm")
            .unwrap_or(self.config.send_keys_confirm)
    }

    pub fn paste_multiline_confirm(&self) -> bool {
        self.overrides
            .get_bool("paste_multiline_confirm")
            .unwrap_or(self.config.paste_multiline_confirm)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.config.exec_timeout)
    }

    /// Model sent with each request: the active named model's, else the
    /// legacy provider sections'.
    pub fn model(&self) -> String {
        if let Some((_, named)) = self.active_model() {
            return named.model_name().to_string();
        }
        self.overrides
            .get_str("openrouter.model")
            .map(str::to_string)
            .unwrap_or_else(|| self.config.model())
    }

    pub fn tools_manifest_path(&self) -> String {
        self.overrides
            .get_str("tools_manifest_path")
            .unwrap_or(&self.config.tools_manifest_path)
            .to_string()
    }

    // ── Model selection ──

    /// Name of the model selected for this session, if any are configured.
    pub fn active_model_name(&self) -> Option<&str> {
        self.overrides
            .get_str("default_model")
            .or_else(|| self.config.default_model_name())
    }

    /// The selected named model, when its name is actually configured.
    pub fn active_model(&self) -> Option<(&str, &ModelConfig)> {
        let name = self.active_model_name()?;
        self.config.models.get(name).map(|m| (name, m))
    }

    /// Provider and API key for requests: the active named model's, else
    /// the legacy selection.
    pub fn provider(&self) -> Result<(Provider, String), String> {
        match self.active_model() {
            Some((name, _)) => self.config.model_provider(name),
            None => self.config.provider(),
        }
    }

    /// Select the named model for the rest of the session. Nothing changes
    /// unless the model resolves to a usable provider.
    pub fn switch_model(&mut self, name: &str) -> Result<(Provider, String), String> {
        let resolved = self.config.model_provider(name)?;
        self.overrides
            .insert_internal("default_model", serde_json::Value::String(name.to_string()));
        Ok(resolved)
    }
}
