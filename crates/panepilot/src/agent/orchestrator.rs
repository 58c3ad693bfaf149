//! The turn loop.
//!
//! [`Orchestrator::process_message`] drives one user request to a terminal
//! state. Each iteration is one model turn:
//!
//! 1. Squash the history when it is over 80% of the context budget.
//! 2. Snapshot the window and compose the turn input.
//! 3. Ask the model, parse the reply, check the response format.
//! 4. Run the single permitted effect after confirmation.
//! 5. Decide what happens next as a [`TurnOutcome`].
//!
//! Follow-ups that used to be recursion are iterations of the outer loop,
//! which bounds them: format violations by `max_guideline_retries`, and
//! "updated pane content" or busy-wait follow-ups by `max_continuations`.
//!
//! A busy-wait follow-up runs under a fresh [`CancellationToken`], so an
//! interrupt that lands during the countdown does not also abort the
//! continuation. Status is the second stop signal: the loop checks it before
//! every turn and the command wait checks it on every poll, so clearing it
//! ends a request whatever token its current turn runs under. Command waits
//! are also bounded by `exec_timeout`.
//!
//! Finished commands are reflected on by a background drain started when
//! the request ends. Its summaries join the history at the start of the
//! next request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::countdown::{Countdown, SleepCountdown};
use crate::agent::events::{AgentEvent, EventHandler, NoopHandler};
use crate::agent::prompts::{
    UPDATED_PANE_CONTENT, busy_continuation, compose_turn_input, system_prompt, watch_start_text,
};
use crate::agent::response::{AiResponse, check_guidelines, parse_response};
use crate::agent::session::{ChatMessage, Session, SessionStatus};
use crate::api::{ChatModel, CompletionError, role_messages};
use crate::confirm::Confirmer;
use crate::context::{needs_compression, squash_history};
use crate::pane::Pane;
use crate::pane::exec::{init_exec_pane, refresh_pane};
use crate::pane::prepared::{
    EXEC_POLL_INTERVAL, ExecWait, exec_wait_capture, parse_exec_history, prepare_pane,
};
use crate::pane::snapshot::capture_window;

/// Pause after injecting text into the exec pane.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// What the outer loop does after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The request reached a terminal state. `true` means accomplished.
    Done(bool),
    /// The reply broke the response format; ask again with this text.
    Retry(String),
    /// Let the model react to the new pane state.
    Continue(String),
    /// Like `Continue`, under a new cancellation scope.
    ContinueFresh(String),
}

/// Drives requests against one [`Session`].
pub struct Orchestrator {
    pub session: Session,
    model: Arc<dyn ChatModel>,
    pane: Arc<dyn Pane>,
    confirmer: Arc<dyn Confirmer>,
    countdown: Arc<dyn Countdown>,
    handler: Arc<dyn EventHandler>,
    settle_delay: Duration,
    exec_poll: Duration,
}

impl Orchestrator {
    pub fn new(
        session: Session,
        model: Arc<dyn ChatModel>,
        pane: Arc<dyn Pane>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            session,
            model,
            pane,
            confirmer,
            countdown: Arc::new(SleepCountdown),
            handler: Arc::new(NoopHandler),
            settle_delay: SETTLE_DELAY,
            exec_poll: EXEC_POLL_INTERVAL,
        }
    }

    pub fn with_countdown(mut self, countdown: Arc<dyn Countdown>) -> Self {
        self.countdown = countdown;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn pane(&self) -> &Arc<dyn Pane> {
        &self.pane
    }

    /// Swap the model client, e.g. after `/model` selects another provider.
    pub fn set_model(&mut self, model: Arc<dyn ChatModel>) {
        self.model = model;
    }

    fn emit(&self, event: AgentEvent<'_>) {
        self.handler.on_event(&event);
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Process one user request until it is accomplished, needs the user,
    /// fails, or is cancelled. Returns `true` only when accomplished.
    pub async fn process_message(&mut self, cancel: &CancellationToken, text: &str) -> bool {
        self.collect_reflections();
        self.session.status.set(SessionStatus::Running);

        let max_retries = self.session.config.max_guideline_retries;
        let max_continuations = self.session.config.max_continuations;
        let mut scope = cancel.clone();
        let mut prompt = text.to_string();
        let mut violations = 0u32;
        let mut continuations = 0u32;

        let accomplished = loop {
            if self.session.status.is_idle() {
                debug!("Status cleared, ending request");
                break false;
            }
            let (next, fresh_scope) = match self.run_turn(&scope, &prompt).await {
                TurnOutcome::Done(accomplished) => break accomplished,
                TurnOutcome::Retry(violation) => {
                    violations += 1;
                    if violations > max_retries {
                        self.emit(AgentEvent::GuidelineLimitReached {
                            attempts: violations,
                        });
                        self.session.status.clear();
                        break false;
                    }
                    self.emit(AgentEvent::GuidelineRetry {
                        attempt: violations,
                        violation: &violation,
                    });
                    prompt = violation;
                    continue;
                }
                TurnOutcome::Continue(next) => (next, false),
                TurnOutcome::ContinueFresh(next) => (next, true),
            };

            violations = 0;
            continuations += 1;
            if continuations > max_continuations {
                self.emit(AgentEvent::ContinuationLimitReached {
                    max: max_continuations,
                });
                self.session.status.clear();
                break false;
            }
            if fresh_scope {
                scope = CancellationToken::new();
            }
            prompt = next;
        };

        self.spawn_reflections();
        accomplished
    }

    /// Poll the window every `wait_interval` seconds and comment on changes
    /// matching `description` until the model reports it accomplished, the
    /// status is cleared, or `cancel` fires.
    pub async fn run_watch(&mut self, description: &str, cancel: &CancellationToken) {
        self.session.watch_mode = true;
        self.session.status.set(SessionStatus::Running);
        info!(description, "Watch mode started");

        let mut prompt = watch_start_text(description);
        loop {
            if self.session.status.is_idle() || !self.session.watch_mode {
                break;
            }
            self.countdown
                .wait(self.session.wait_interval(), cancel)
                .await;
            if cancel.is_cancelled() {
                break;
            }

            let turn = cancel.child_token();
            if self.process_message(&turn, &prompt).await {
                self.session.watch_mode = false;
                self.session.status.clear();
            }
            if cancel.is_cancelled() {
                break;
            }
            prompt.clear();
        }

        if cancel.is_cancelled() {
            self.session.watch_mode = false;
        }
        info!("Watch mode ended");
    }

    // ── One turn ───────────────────────────────────────────────────

    async fn run_turn(&mut self, cancel: &CancellationToken, text: &str) -> TurnOutcome {
        if needs_compression(&self.session.history, self.session.max_context_size()) {
            self.squash(cancel).await;
        }
        if cancel.is_cancelled() {
            return TurnOutcome::Done(false);
        }

        let max_lines = self.session.max_capture_lines();
        if let Err(e) = refresh_pane(self.pane.as_ref(), &mut self.session.exec_pane, max_lines).await
        {
            warn!("Failed to refresh exec pane: {e}");
        }
        let snapshot = match capture_window(
            self.pane.as_ref(),
            &self.session.chat_pane_id,
            &self.session.exec_pane,
            max_lines,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.emit(AgentEvent::Notice(&format!("Failed to capture panes: {e}")));
                return TurnOutcome::Done(false);
            }
        };

        let input = ChatMessage::user(compose_turn_input(
            &snapshot,
            &self.session.exec_pane,
            text,
        ));
        let mut outbound = vec![ChatMessage::assistant(system_prompt(
            &self.session.config,
            self.session.watch_mode,
            self.session.exec_pane.is_prepared,
        ))];
        outbound.extend(self.session.history.iter().cloned());
        outbound.push(input.clone());

        let model = self.session.model();
        let raw = match self
            .model
            .complete(&model, &role_messages(&outbound), cancel)
            .await
        {
            Ok(raw) => raw,
            Err(CompletionError::Cancelled) => return TurnOutcome::Done(false),
            Err(CompletionError::Failed(_)) if cancel.is_cancelled() => {
                return TurnOutcome::Done(false);
            }
            Err(CompletionError::Failed(e)) => {
                self.emit(AgentEvent::ModelError(&e));
                return TurnOutcome::Done(false);
            }
        };

        if self.session.status.is_idle() {
            debug!("Status cleared during model call, abandoning turn");
            return TurnOutcome::Done(false);
        }

        let response = match parse_response(&raw) {
            Ok(response) => response,
            Err(e) => {
                self.session.status.clear();
                self.emit(AgentEvent::ParseError(&e));
                return TurnOutcome::Done(false);
            }
        };
        let reply = ChatMessage::assistant(raw);

        if let Err(violation) = check_guidelines(&response, self.session.watch_mode) {
            self.session.push_exchange(input, reply);
            return TurnOutcome::Retry(violation.message().to_string());
        }

        if !response.message.is_empty() {
            self.emit(AgentEvent::Message(&response.message));
        }
        if !(response.exec_pane_seems_busy || response.no_comment) {
            self.session.push_exchange(input, reply);
        }

        if let Some(outcome) = self.apply_effects(&response, cancel).await {
            return outcome;
        }
        self.next_step(&response)
    }

    /// Run commands, keys, and paste in that order. Returns an outcome when
    /// the turn must end early.
    async fn apply_effects(
        &mut self,
        response: &AiResponse,
        cancel: &CancellationToken,
    ) -> Option<TurnOutcome> {
        let pane_id = self.session.exec_pane.id.clone();

        for proposed in &response.exec_command {
            self.emit(AgentEvent::CommandProposed(proposed));
            let command = if self.session.exec_confirm() {
                let confirmation = self
                    .confirmer
                    .confirm(proposed, "Execute this command?", true)
                    .await;
                if !confirmation.approved {
                    self.session.status.clear();
                    return Some(TurnOutcome::Done(false));
                }
                confirmation.command
            } else {
                proposed.clone()
            };

            self.emit(AgentEvent::CommandExecuting(&command));
            if self.session.exec_pane.is_prepared {
                let max_lines = self.session.max_capture_lines();
                let wait = ExecWait {
                    poll: self.exec_poll,
                    timeout: self.session.exec_timeout(),
                };
                let status = self.session.status.clone();
                match exec_wait_capture(
                    self.pane.as_ref(),
                    &pane_id,
                    &command,
                    max_lines,
                    wait,
                    cancel,
                    || status.is_idle(),
                )
                .await
                {
                    Ok(record) => {
                        self.emit(AgentEvent::CommandFinished {
                            command: &record.command,
                            code: record.code,
                        });
                        self.session.exec_history.push(record.clone());
                        self.session.reflections.enqueue(record);
                    }
                    Err(_) if cancel.is_cancelled() || self.session.status.is_idle() => {
                        return Some(TurnOutcome::Done(false));
                    }
                    Err(e) => {
                        self.emit(AgentEvent::Notice(&format!("Command did not complete: {e}")));
                        return Some(TurnOutcome::Done(false));
                    }
                }
            } else {
                if let Err(e) = self.pane.send_text(&pane_id, &command, true).await {
                    self.emit(AgentEvent::Notice(&format!("Failed to send command: {e}")));
                    return Some(TurnOutcome::Done(false));
                }
                tokio::time::sleep(self.settle_delay).await;
            }
        }

        if !response.send_keys.is_empty() {
            self.emit(AgentEvent::KeysPreview(&response.send_keys));
            if self.session.status.is_idle() {
                return Some(TurnOutcome::Done(false));
            }
            if self.session.send_keys_confirm() {
                let prompt = if response.send_keys.len() > 1 {
                    "Send all these keys?"
                } else {
                    "Send this key?"
                };
                let confirmation = self
                    .confirmer
                    .confirm("keys shown above", prompt, false)
                    .await;
                if !confirmation.approved {
                    self.session.status.clear();
                    return Some(TurnOutcome::Done(false));
                }
            }
            for key in &response.send_keys {
                self.emit(AgentEvent::SendingKeys(key));
                if let Err(e) = self.pane.send_text(&pane_id, key, false).await {
                    self.emit(AgentEvent::Notice(&format!("Failed to send keys: {e}")));
                    return Some(TurnOutcome::Done(false));
                }
                tokio::time::sleep(self.settle_delay).await;
            }
        }

        let paste = &response.paste_multiline_content;
        if !paste.is_empty() {
            self.emit(AgentEvent::PastePreview(paste));
            if self.session.paste_multiline_confirm() {
                let confirmation = self
                    .confirmer
                    .confirm(paste, "Paste multiline content?", false)
                    .await;
                if !confirmation.approved {
                    self.session.status.clear();
                    return Some(TurnOutcome::Done(false));
                }
            }
            self.emit(AgentEvent::Pasting);
            if let Err(e) = self.pane.send_text(&pane_id, paste, true).await {
                self.emit(AgentEvent::Notice(&format!("Failed to paste: {e}")));
                return Some(TurnOutcome::Done(false));
            }
            tokio::time::sleep(self.settle_delay).await;
        }

        if response.exec_pane_seems_busy {
            let seconds = self.session.wait_interval();
            self.countdown.wait(seconds, cancel).await;
            return Some(TurnOutcome::ContinueFresh(busy_continuation(seconds)));
        }
        None
    }

    fn next_step(&mut self, response: &AiResponse) -> TurnOutcome {
        if response.request_accomplished {
            self.session.status.clear();
            return TurnOutcome::Done(true);
        }
        if response.waiting_for_user_response {
            self.session.status.set(SessionStatus::Waiting);
            return TurnOutcome::Done(false);
        }
        if response.no_comment || self.session.watch_mode {
            return TurnOutcome::Done(false);
        }
        TurnOutcome::Continue(UPDATED_PANE_CONTENT.to_string())
    }

    fn spawn_reflections(&self) {
        self.session.reflections.spawn_drain(
            self.model.clone(),
            self.session.model(),
            self.session.tools_manifest_path(),
        );
    }

    /// Move summaries finished in the background into the history.
    pub fn collect_reflections(&mut self) {
        for summary in self.session.reflections.take_finished() {
            self.emit(AgentEvent::ReflectionSummary(&summary));
            self.session.history.push(ChatMessage::assistant(summary));
        }
    }

    // ── Session maintenance ────────────────────────────────────────

    /// Summarize the history. Returns whether it changed.
    pub async fn squash(&mut self, cancel: &CancellationToken) -> bool {
        self.emit(AgentEvent::SquashStarted);
        let model = self.session.model();
        match squash_history(&mut self.session.history, self.model.as_ref(), &model, cancel).await {
            Ok(Some(report)) => {
                self.emit(AgentEvent::SquashFinished {
                    summarized: report.summarized,
                    tokens_before: report.tokens_before,
                    tokens_after: report.tokens_after,
                });
                true
            }
            Ok(None) => {
                self.emit(AgentEvent::Notice("Nothing to squash"));
                false
            }
            Err(e) => {
                self.emit(AgentEvent::SquashFailed(&e));
                false
            }
        }
    }

    /// Pick or create the exec pane for this session.
    pub async fn init_exec_pane(&mut self) -> Result<(), String> {
        let details = init_exec_pane(
            self.pane.as_ref(),
            &self.session.chat_pane_id,
            self.session.max_capture_lines(),
        )
        .await?;
        info!(pane = %details.id, shell = %details.shell, prepared = details.is_prepared, "Exec pane ready");
        self.session.exec_pane = details;
        Ok(())
    }

    /// Install the marker prompt in the exec pane. `shell` defaults to the
    /// pane's own shell and is required when the pane runs a sub-shell.
    /// Starts a fresh conversation.
    pub async fn prepare_exec_pane(&mut self, shell: Option<&str>) -> Result<(), String> {
        let max_lines = self.session.max_capture_lines();
        refresh_pane(self.pane.as_ref(), &mut self.session.exec_pane, max_lines).await?;

        let exec = &self.session.exec_pane;
        let shell = match shell {
            Some(shell) => shell.to_string(),
            None if exec.is_sub_shell => {
                return Err(format!(
                    "Exec pane is running '{}'; name the shell to prepare, e.g. /prepare bash",
                    exec.current_command
                ));
            }
            None => exec.shell.clone(),
        };

        prepare_pane(self.pane.as_ref(), &exec.id, &shell).await?;
        refresh_pane(self.pane.as_ref(), &mut self.session.exec_pane, max_lines).await?;
        self.session.exec_pane.shell = shell;
        self.session.exec_history = parse_exec_history(&self.session.exec_pane.content);
        self.session.history.clear();
        debug!(
            entries = self.session.exec_history.len(),
            "Parsed exec history after prepare"
        );
        Ok(())
    }

    /// Forget the conversation.
    pub fn clear_history(&mut self) {
        self.session.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::AgentConfig;
    use crate::agent::response::GuidelineViolation;
    use crate::confirm::Confirmation;
    use crate::pane::PaneDetails;
    use crate::testing::{
        RecordingCountdown, RecordingHandler, RecordingPane, ScriptedConfirmer, ScriptedModel,
    };

    const PREPARED_IDLE: &str = "[me@box ~][0]»";

    struct Harness {
        model: Arc<ScriptedModel>,
        pane: Arc<RecordingPane>,
        confirmer: Arc<ScriptedConfirmer>,
        countdown: Arc<RecordingCountdown>,
        events: Arc<RecordingHandler>,
        _dir: tempfile::TempDir,
    }

    fn setup_with(
        replies: &[&str],
        answers: Vec<Confirmation>,
        configure: impl FnOnce(&mut AgentConfig),
    ) -> (Orchestrator, Harness) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig {
            reflection_log_path: Some(dir.path().join("lessons-learned.json")),
            ..Default::default()
        };
        configure(&mut config);

        let mut session = Session::new(config, "%0");
        session.exec_pane = PaneDetails {
            id: "%1".into(),
            current_command: "bash".into(),
            ..Default::default()
        };

        let h = Harness {
            model: Arc::new(ScriptedModel::new(replies.iter().copied())),
            pane: Arc::new(RecordingPane::new()),
            confirmer: Arc::new(ScriptedConfirmer::new(answers)),
            countdown: Arc::new(RecordingCountdown::default()),
            events: Arc::new(RecordingHandler::default()),
            _dir: dir,
        };
        h.pane.set_panes(vec![
            PaneDetails {
                id: "%0".into(),
                current_command: "zsh".into(),
                ..Default::default()
            },
            PaneDetails {
                id: "%1".into(),
                current_command: "bash".into(),
                ..Default::default()
            },
        ]);
        h.pane.push_capture("$ ");

        let orchestrator = Orchestrator::new(
            session,
            h.model.clone(),
            h.pane.clone(),
            h.confirmer.clone(),
        )
        .with_countdown(h.countdown.clone())
        .with_handler(h.events.clone());
        (orchestrator, h)
    }

    fn setup(replies: &[&str], answers: Vec<Confirmation>) -> (Orchestrator, Harness) {
        setup_with(replies, answers, |_| {})
    }

    fn last_content(request: &[crate::Message]) -> &str {
        &request.last().unwrap().content
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_is_never_sent() {
        let (mut orch, h) = setup(
            &["Cleaning up.\n<ExecCommand>rm -rf /</ExecCommand>"],
            vec![Confirmation::rejected()],
        );

        let accomplished = orch.process_message(&CancellationToken::new(), "free space").await;

        assert!(!accomplished);
        assert!(orch.session.status.is_idle());
        assert!(h.pane.sent().is_empty());
        assert_eq!(
            h.confirmer.calls(),
            vec![("rm -rf /".to_string(), "Execute this command?".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn accomplished_ends_without_follow_up() {
        let (mut orch, h) = setup(&["All set.\n<RequestAccomplished>1</RequestAccomplished>"], vec![]);

        assert!(orch.process_message(&CancellationToken::new(), "check").await);
        assert!(orch.session.status.is_idle());
        assert_eq!(h.model.requests().len(), 1);
        assert_eq!(orch.session.history.len(), 2);
        assert!(h.events.contains("Message(\"All set.\")"));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_pane_waits_then_continues_once_with_fresh_prompt() {
        let (mut orch, h) = setup(
            &[
                "Still compiling.\n<ExecPaneSeemsBusy>1</ExecPaneSeemsBusy>",
                "<RequestAccomplished>1</RequestAccomplished>",
            ],
            vec![],
        );

        assert!(orch.process_message(&CancellationToken::new(), "build it").await);

        assert_eq!(h.countdown.waits(), vec![5]);
        let requests = h.model.requests();
        assert_eq!(requests.len(), 2);
        assert!(last_content(&requests[1]).ends_with(
            "waited for 5 more seconds, here is the current pane(s) content"
        ));
        // The busy exchange is not kept; only the final one is.
        assert_eq!(orch.session.history.len(), 2);
        assert!(orch.session.history[0].content.ends_with(&busy_continuation(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_continuation_result_is_final() {
        let (mut orch, h) = setup(
            &[
                "<ExecPaneSeemsBusy>1</ExecPaneSeemsBusy>",
                "Which branch?\n<WaitingForUserResponse>1</WaitingForUserResponse>",
            ],
            vec![],
        );

        assert!(!orch.process_message(&CancellationToken::new(), "deploy").await);
        assert_eq!(h.model.requests().len(), 2);
        assert_eq!(orch.session.status.get(), SessionStatus::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn approved_command_is_sent_and_followed_up() {
        let (mut orch, h) = setup(
            &[
                "<ExecCommand>ls</ExecCommand>",
                "<RequestAccomplished>1</RequestAccomplished>",
            ],
            vec![Confirmation::approved("ls -la")],
        );

        assert!(orch.process_message(&CancellationToken::new(), "list").await);

        assert_eq!(h.pane.sent(), vec![("%1".to_string(), "ls -la".to_string(), true)]);
        let requests = h.model.requests();
        assert!(last_content(&requests[1]).ends_with(UPDATED_PANE_CONTENT));
        assert!(h.events.contains("CommandExecuting(\"ls -la\")"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_confirmed_once_and_sent_without_enter() {
        let (mut orch, h) = setup(
            &[
                "<TmuxSendKeys>vim notes.txt</TmuxSendKeys><TmuxSendKeys>Enter</TmuxSendKeys>",
                "<RequestAccomplished>1</RequestAccomplished>",
            ],
            vec![],
        );

        assert!(orch.process_message(&CancellationToken::new(), "open notes").await);

        assert_eq!(
            h.confirmer.calls(),
            vec![(
                "keys shown above".to_string(),
                "Send all these keys?".to_string(),
                false
            )]
        );
        assert_eq!(
            h.pane.sent(),
            vec![
                ("%1".to_string(), "vim notes.txt".to_string(), false),
                ("%1".to_string(), "Enter".to_string(), false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_paste_clears_status() {
        let (mut orch, h) = setup(
            &["<PasteMultilineContent>\nline one\nline two\n</PasteMultilineContent>"],
            vec![Confirmation::rejected()],
        );

        assert!(!orch.process_message(&CancellationToken::new(), "paste").await);
        assert!(orch.session.status.is_idle());
        assert!(h.pane.sent().is_empty());
        assert_eq!(h.confirmer.calls()[0].1, "Paste multiline content?");
        assert!(!h.confirmer.calls()[0].2);
    }

    #[tokio::test(start_paused = true)]
    async fn guideline_violation_is_fed_back() {
        let (mut orch, h) = setup(
            &["I think it's fine.", "<RequestAccomplished>1</RequestAccomplished>"],
            vec![],
        );

        assert!(orch.process_message(&CancellationToken::new(), "check").await);

        let requests = h.model.requests();
        assert_eq!(requests.len(), 2);
        assert!(last_content(&requests[1]).ends_with(GuidelineViolation::NoTags.message()));
        // Violating exchange plus the final one.
        assert_eq!(orch.session.history.len(), 4);
        assert!(h.events.contains("GuidelineRetry"));
    }

    #[tokio::test(start_paused = true)]
    async fn guideline_retries_are_capped() {
        let (mut orch, h) = setup_with(&["no tags", "still none", "nope"], vec![], |c| {
            c.max_guideline_retries = 2;
        });

        assert!(!orch.process_message(&CancellationToken::new(), "check").await);

        assert_eq!(h.model.requests().len(), 3);
        assert!(orch.session.status.is_idle());
        assert!(h.events.contains("GuidelineLimitReached { attempts: 3 }"));
    }

    #[tokio::test(start_paused = true)]
    async fn continuations_are_capped() {
        let (mut orch, h) = setup_with(
            &["<ExecCommand>ls</ExecCommand>", "<ExecCommand>pwd</ExecCommand>"],
            vec![],
            |c| {
                c.max_continuations = 1;
                c.exec_confirm = false;
            },
        );

        assert!(!orch.process_message(&CancellationToken::new(), "explore").await);

        assert_eq!(h.pane.sent().len(), 2);
        assert!(h.confirmer.calls().is_empty());
        assert!(h.events.contains("ContinuationLimitReached { max: 1 }"));
        assert!(orch.session.status.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn parse_error_ends_turn() {
        let (mut orch, h) = setup(&["<ExecCommand>ls"], vec![]);

        assert!(!orch.process_message(&CancellationToken::new(), "list").await);
        assert!(orch.session.status.is_idle());
        assert!(orch.session.history.is_empty());
        assert!(h.events.contains("ParseError"));
    }

    #[tokio::test(start_paused = true)]
    async fn model_failure_is_reported_and_cancellation_is_silent() {
        let (mut orch, _h) = setup(&[], vec![]);
        let failing = Arc::new(RecordingHandler::default());
        orch.model = Arc::new(ScriptedModel::failing("HTTP 500"));
        orch.handler = failing.clone();

        assert!(!orch.process_message(&CancellationToken::new(), "hi").await);
        assert!(failing.contains("ModelError(\"HTTP 500\")"));
        assert!(orch.session.history.is_empty());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let quiet = Arc::new(RecordingHandler::default());
        orch.handler = quiet.clone();
        assert!(!orch.process_message(&cancelled, "hi").await);
        assert!(quiet.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_status_abandons_turn_after_model_call() {
        struct ClearingModel(crate::agent::session::StatusCell);
        impl ChatModel for ClearingModel {
            fn complete<'a>(
                &'a self,
                _model: &'a str,
                _messages: &'a [crate::Message],
                _cancel: &'a CancellationToken,
            ) -> futures::future::BoxFuture<'a, Result<String, CompletionError>> {
                Box::pin(async move {
                    self.0.clear();
                    Ok("<ExecCommand>ls</ExecCommand>".to_string())
                })
            }
        }

        let (mut orch, h) = setup(&[], vec![]);
        orch.model = Arc::new(ClearingModel(orch.session.status.clone()));

        assert!(!orch.process_message(&CancellationToken::new(), "list").await);
        assert!(h.pane.sent().is_empty());
        assert!(orch.session.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_command_is_captured_and_reflected() {
        let (mut orch, h) = setup(
            &[
                "<ExecCommand>make</ExecCommand>",
                "<RequestAccomplished>1</RequestAccomplished>",
                r#"{"lessons":"make succeeded","alternative":{"command":"","reason":""},"tools":[]}"#,
            ],
            vec![],
        );
        // refresh, snapshot, and the pre-send capture see an idle prompt;
        // the first poll sees the finished command.
        let pane = RecordingPane::new();
        pane.set_panes(vec![PaneDetails {
            id: "%1".into(),
            current_command: "bash".into(),
            ..Default::default()
        }]);
        for _ in 0..3 {
            pane.push_capture(PREPARED_IDLE);
        }
        pane.push_capture("[me@box ~][0]» make\nok\n[me@box ~][0]»");
        let pane = Arc::new(pane);
        orch.pane = pane.clone();

        assert!(orch.process_message(&CancellationToken::new(), "build").await);

        assert_eq!(pane.sent(), vec![("%1".to_string(), "make".to_string(), true)]);
        assert_eq!(orch.session.exec_history.len(), 1);
        assert_eq!(orch.session.exec_history[0].output, "ok");
        assert!(h.events.contains("CommandFinished"));

        orch.session.reflections.wait_idle().await;
        assert_eq!(h.model.requests().len(), 3);
        assert_eq!(orch.session.reflections.pending_len(), 0);
        assert_eq!(orch.session.reflections.log_len(), 1);

        orch.collect_reflections();
        assert!(h.events.contains("ReflectionSummary"));
        let last = orch.session.history.last().unwrap();
        assert!(!last.from_user);
        assert!(last.content.starts_with("Reflection Summary\nCommand: make\nExit Code: 0"));
    }

    /// Holds reflection requests until released.
    struct GatedReflections {
        inner: ScriptedModel,
        gate: tokio::sync::Notify,
    }

    impl ChatModel for GatedReflections {
        fn complete<'a>(
            &'a self,
            model: &'a str,
            messages: &'a [crate::Message],
            cancel: &'a CancellationToken,
        ) -> futures::future::BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async move {
                if messages.first().is_some_and(|m| m.content.contains("strict JSON")) {
                    self.gate.notified().await;
                }
                self.inner.complete(model, messages, cancel).await
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_returns_before_reflection_finishes() {
        let (mut orch, h) = setup(&[], vec![]);
        let model = Arc::new(GatedReflections {
            inner: ScriptedModel::new([
                "<ExecCommand>make</ExecCommand>",
                "<RequestAccomplished>1</RequestAccomplished>",
                r#"{"lessons":"fine","alternative":{"command":"","reason":""},"tools":[]}"#,
            ]),
            gate: tokio::sync::Notify::new(),
        });
        orch.model = model.clone();
        let pane = RecordingPane::new();
        pane.set_panes(vec![PaneDetails {
            id: "%1".into(),
            current_command: "bash".into(),
            ..Default::default()
        }]);
        for _ in 0..3 {
            pane.push_capture(PREPARED_IDLE);
        }
        pane.push_capture("[me@box ~][0]» make\nok\n[me@box ~][0]»");
        orch.pane = Arc::new(pane);

        assert!(orch.process_message(&CancellationToken::new(), "build").await);
        tokio::task::yield_now().await;

        assert_eq!(orch.session.history.len(), 4);
        assert_eq!(orch.session.reflections.log_len(), 0);
        assert!(!h.events.contains("ReflectionSummary"));

        model.gate.notify_one();
        orch.session.reflections.wait_idle().await;
        assert_eq!(orch.session.reflections.log_len(), 1);

        // The next request picks the summary up before its first turn.
        orch.model = Arc::new(ScriptedModel::new(["<RequestAccomplished>1</RequestAccomplished>"]));
        assert!(orch.process_message(&CancellationToken::new(), "thanks").await);
        assert!(h.events.contains("ReflectionSummary"));
        assert!(orch.session.history[4].content.starts_with("Reflection Summary"));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_busy_wait_stops_command_that_never_returns() {
        let (mut orch, h) = setup_with(
            &[
                "Still starting.\n<ExecPaneSeemsBusy>1</ExecPaneSeemsBusy>",
                "<ExecCommand>tail -f app.log</ExecCommand>",
            ],
            vec![],
            |c| c.exec_confirm = false,
        );
        let pane = RecordingPane::new();
        pane.set_panes(vec![PaneDetails {
            id: "%1".into(),
            current_command: "bash".into(),
            ..Default::default()
        }]);
        for _ in 0..5 {
            pane.push_capture(PREPARED_IDLE);
        }
        pane.push_capture("[me@box ~][0]» tail -f app.log\nGET /health 200");
        let pane = Arc::new(pane);
        orch.pane = pane.clone();

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let status = orch.session.status.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            interrupt.cancel();
            status.clear();
        });

        let start = tokio::time::Instant::now();
        let accomplished = tokio::time::timeout(
            Duration::from_secs(3600),
            orch.process_message(&cancel, "start the server"),
        )
        .await
        .expect("request ends after the interrupt");

        assert!(!accomplished);
        assert!(start.elapsed() < Duration::from_secs(12));
        assert_eq!(h.countdown.waits(), vec![5]);
        assert_eq!(
            pane.sent(),
            vec![("%1".to_string(), "tail -f app.log".to_string(), true)]
        );
        assert!(orch.session.status.is_idle());
        assert!(!h.events.contains("Command did not complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn command_wait_is_bounded_by_exec_timeout() {
        let (mut orch, h) = setup_with(
            &["<ExecCommand>tail -f app.log</ExecCommand>"],
            vec![],
            |c| {
                c.exec_confirm = false;
                c.exec_timeout = 20;
            },
        );
        let pane = RecordingPane::new();
        pane.set_panes(vec![PaneDetails {
            id: "%1".into(),
            current_command: "bash".into(),
            ..Default::default()
        }]);
        for _ in 0..3 {
            pane.push_capture(PREPARED_IDLE);
        }
        pane.push_capture("[me@box ~][0]» tail -f app.log\nGET /health 200");
        orch.pane = Arc::new(pane);

        assert!(!orch.process_message(&CancellationToken::new(), "tail it").await);
        assert!(h.events.contains("still running after 20s"));
        assert_eq!(orch.session.reflections.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_runs_until_accomplished() {
        let (mut orch, h) = setup(
            &[
                "<NoComment>1</NoComment>",
                "The build failed.\n<RequestAccomplished>1</RequestAccomplished>",
            ],
            vec![],
        );

        orch.run_watch("build errors", &CancellationToken::new()).await;

        assert!(!orch.session.watch_mode);
        assert!(orch.session.status.is_idle());
        assert_eq!(h.countdown.waits(), vec![5, 5]);
        let requests = h.model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0][0].content.contains("watch mode"));
        assert!(last_content(&requests[0]).ends_with("Watch for: build errors"));
        assert!(last_content(&requests[1]).ends_with("\n\n"));
        assert_eq!(orch.session.history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_stops_on_cancel() {
        let (mut orch, h) = setup(&[], vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        orch.run_watch("anything", &cancel).await;

        assert!(!orch.session.watch_mode);
        assert!(h.model.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_requires_shell_for_sub_shell() {
        let (mut orch, h) = setup(&[], vec![]);
        h.pane.set_panes(vec![PaneDetails {
            id: "%1".into(),
            current_command: "ssh".into(),
            is_sub_shell: true,
            ..Default::default()
        }]);

        let err = orch.prepare_exec_pane(None).await.unwrap_err();
        assert!(err.contains("/prepare bash"));

        orch.prepare_exec_pane(Some("bash")).await.unwrap();
        assert_eq!(orch.session.exec_pane.shell, "bash");
        assert_eq!(h.pane.cleared(), vec!["%1".to_string()]);
        assert_eq!(h.pane.sent().len(), 1);
    }
}
