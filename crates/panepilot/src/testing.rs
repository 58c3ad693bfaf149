//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::Message;
use crate::agent::countdown::Countdown;
use crate::agent::events::{AgentEvent, EventHandler};
use crate::api::{ChatModel, CompletionError};
use crate::confirm::{Confirmation, Confirmer};
use crate::pane::{Pane, PaneDetails};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Model ──────────────────────────────────────────────────────────

/// Replies from a fixed script and records every request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    failure: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `error`.
    pub fn failing(error: &str) -> Self {
        Self {
            failure: Some(error.to_string()),
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }
}

impl ChatModel for ScriptedModel {
    fn complete<'a>(
        &'a self,
        _model: &'a str,
        messages: &'a [Message],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, CompletionError>> {
        Box::pin(async move {
            lock(&self.requests).push(messages.to_vec());
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            if let Some(error) = &self.failure {
                return Err(CompletionError::Failed(error.clone()));
            }
            lock(&self.replies)
                .pop_front()
                .ok_or_else(|| CompletionError::Failed("script exhausted".into()))
        })
    }
}

// ── Pane ───────────────────────────────────────────────────────────

/// A fake tmux: canned pane lists and captures, recorded writes.
#[derive(Default)]
pub struct RecordingPane {
    panes: Mutex<Vec<PaneDetails>>,
    captures: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<(String, String, bool)>>,
    created: Mutex<Vec<String>>,
    cleared: Mutex<Vec<String>>,
}

impl RecordingPane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_panes(&self, panes: Vec<PaneDetails>) {
        *lock(&self.panes) = panes;
    }

    /// Queue a capture result. The last one repeats once the queue drains.
    pub fn push_capture(&self, content: &str) {
        lock(&self.captures).push_back(content.to_string());
    }

    /// `(pane_id, text, auto_enter)` for every send.
    pub fn sent(&self) -> Vec<(String, String, bool)> {
        lock(&self.sent).clone()
    }

    /// Targets passed to `create_pane`.
    pub fn created(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        lock(&self.cleared).clone()
    }
}

impl Pane for RecordingPane {
    fn list_panes<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<Vec<PaneDetails>, String>> {
        Box::pin(async move {
            let panes = lock(&self.panes).clone();
            if target.starts_with('%') {
                return Ok(panes.into_iter().filter(|p| p.id == target).collect());
            }
            Ok(panes)
        })
    }

    fn capture<'a>(
        &'a self,
        _pane_id: &'a str,
        _max_lines: usize,
    ) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let mut captures = lock(&self.captures);
            let content = if captures.len() > 1 {
                captures.pop_front().unwrap_or_default()
            } else {
                captures.front().cloned().unwrap_or_default()
            };
            Ok(content)
        })
    }

    fn send_text<'a>(
        &'a self,
        pane_id: &'a str,
        text: &'a str,
        auto_enter: bool,
    ) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            lock(&self.sent).push((pane_id.to_string(), text.to_string(), auto_enter));
            Ok(())
        })
    }

    fn create_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            lock(&self.created).push(target.to_string());
            Ok("%9".to_string())
        })
    }

    fn create_session(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async { Ok("%0".to_string()) })
    }

    fn attach_session<'a>(&'a self, _pane_id: &'a str) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }

    fn clear_pane<'a>(&'a self, pane_id: &'a str) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            lock(&self.cleared).push(pane_id.to_string());
            Ok(())
        })
    }

    fn current_pane_id(&self) -> Result<String, String> {
        Ok("%0".to_string())
    }

    fn current_window_target(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async { Ok("$0:0".to_string()) })
    }

    fn window_name(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async { Ok("main".to_string()) })
    }
}

// ── Confirmer ──────────────────────────────────────────────────────

/// Answers from a queue; approves as-is once the queue is empty.
#[derive(Default)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<Confirmation>>,
    calls: Mutex<Vec<(String, String, bool)>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: impl IntoIterator<Item = Confirmation>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(command, prompt, allow_edit)` for every call.
    pub fn calls(&self) -> Vec<(String, String, bool)> {
        lock(&self.calls).clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm<'a>(
        &'a self,
        command: &'a str,
        prompt: &'a str,
        allow_edit: bool,
    ) -> BoxFuture<'a, Confirmation> {
        Box::pin(async move {
            lock(&self.calls).push((command.to_string(), prompt.to_string(), allow_edit));
            lock(&self.answers)
                .pop_front()
                .unwrap_or_else(|| Confirmation::approved(command))
        })
    }
}

// ── Countdown ──────────────────────────────────────────────────────

/// Returns immediately and records the requested durations.
#[derive(Default)]
pub struct RecordingCountdown {
    waits: Mutex<Vec<u64>>,
}

impl RecordingCountdown {
    pub fn waits(&self) -> Vec<u64> {
        lock(&self.waits).clone()
    }
}

impl Countdown for RecordingCountdown {
    fn wait<'a>(&'a self, seconds: u64, _cancel: &'a CancellationToken) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.waits).push(seconds);
        })
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Keeps a debug rendering of every event.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.events).iter().any(|e| e.contains(needle))
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        lock(&self.events).push(format!("{event:?}"));
    }
}
