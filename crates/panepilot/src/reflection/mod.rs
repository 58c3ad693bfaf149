//! Post-execution reflection.
//!
//! Every command observed to finish in a prepared exec pane is queued as a
//! [`ReflectionTask`]. After the turn loop returns, a background drain
//! ([`ReflectionPipeline::spawn_drain`]) asks the model to critique each one
//! and return strict JSON:
//!
//! ```json
//! {
//!   "lessons": "...",
//!   "alternative": { "command": "...", "reason": "..." },
//!   "tools": [{ "action": "add", "name": "rg", "section": "Search", "description": "...", "reason": "..." }]
//! }
//! ```
//!
//! Suggested tool actions are applied to the [`manifest`] in the order the
//! model returned them, each action's outcome is recorded, and the result is
//! appended to the bounded [`log`]. A failed reflection is logged and
//! dropped. It never reaches the interactive turn. Finished summaries wait in
//! the pipeline until the next request collects them.
//!
//! - [`log`]: the persisted, capped [`ReflectionLog`](log::ReflectionLog).
//! - [`manifest`]: tool manifest editing.

pub mod log;
pub mod manifest;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Message;
use crate::api::ChatModel;
use crate::pane::prepared::CommandExecHistory;
use self::log::ReflectionLog;

/// Characters of command output sent with a reflection request.
pub const MAX_REFLECTION_OUTPUT: usize = 4000;

const REFLECTION_SYSTEM_PROMPT: &str = r#"You are an autonomous CLI specialist. Analyze the provided command execution, derive improvements, and respond with strict JSON matching this schema:
{
  "lessons": "string",
  "alternative": {
    "command": "string",
    "reason": "string"
  },
  "tools": [
    {
      "action": "add" | "remove" | "update" | "skip",
      "name": "string",
      "section": "string",
      "description": "string",
      "reason": "string"
    }
  ]
}
Return only JSON with no code fences."#;

// ── Types ──────────────────────────────────────────────────────────

/// One finished command waiting to be reflected on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionTask {
    pub history: CommandExecHistory,
}

/// A manifest edit suggested by the model, with what applying it did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAction {
    pub action: String,
    pub name: String,
    pub section: String,
    pub description: String,
    pub reason: String,
    #[serde(default)]
    pub outcome: String,
}

/// A completed reflection as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReflection {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub lessons_learned: String,
    pub alternative: String,
    pub alternative_rationale: String,
    #[serde(default)]
    pub suggested_actions: Vec<ToolAction>,
    pub timestamp: DateTime<Utc>,
}

impl Default for CommandReflection {
    fn default() -> Self {
        Self {
            command: String::new(),
            output: String::new(),
            exit_code: 0,
            lessons_learned: String::new(),
            alternative: String::new(),
            alternative_rationale: String::new(),
            suggested_actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

// ── Wire format ────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ReflectionRequest<'a> {
    command: &'a str,
    exit_code: i32,
    output: String,
    tools_manifest_path: &'a str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ReflectionResponse {
    lessons: String,
    alternative: ReflectionAlternative,
    tools: Vec<ReflectionTool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ReflectionAlternative {
    command: String,
    reason: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ReflectionTool {
    action: String,
    name: String,
    section: String,
    description: String,
    reason: String,
}

/// Keep at most `max` characters, marking the cut.
pub fn truncate_for_reflection(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[truncated]", content.get(..cut).unwrap_or(content)),
        None => content.to_string(),
    }
}

/// Strip a Markdown code fence the model may wrap JSON in.
pub fn sanitize_json_response(response: &str) -> &str {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// The system and user messages for one reflection.
pub fn build_request(
    history: &CommandExecHistory,
    manifest_path: &str,
) -> Result<Vec<Message>, String> {
    let payload = ReflectionRequest {
        command: &history.command,
        exit_code: history.code,
        output: truncate_for_reflection(&history.output, MAX_REFLECTION_OUTPUT),
        tools_manifest_path: manifest_path,
    };
    let user = serde_json::to_string(&payload)
        .map_err(|e| format!("Failed to encode reflection request: {e}"))?;
    Ok(vec![
        Message::system(REFLECTION_SYSTEM_PROMPT),
        Message::user(user),
    ])
}

fn parse_reflection(history: &CommandExecHistory, response: &str) -> Result<CommandReflection, String> {
    let parsed: ReflectionResponse = serde_json::from_str(sanitize_json_response(response))
        .map_err(|e| format!("failed to parse reflection JSON: {e}"))?;

    Ok(CommandReflection {
        command: history.command.clone(),
        output: history.output.clone(),
        exit_code: history.code,
        lessons_learned: parsed.lessons.trim().to_string(),
        alternative: parsed.alternative.command.trim().to_string(),
        alternative_rationale: parsed.alternative.reason.trim().to_string(),
        suggested_actions: parsed
            .tools
            .into_iter()
            .map(|t| ToolAction {
                action: t.action.trim().to_lowercase(),
                name: t.name.trim().to_string(),
                section: t.section.trim().to_string(),
                description: t.description.trim().to_string(),
                reason: t.reason.trim().to_string(),
                outcome: String::new(),
            })
            .collect(),
        timestamp: Utc::now(),
    })
}

// ── Applying tool actions ──────────────────────────────────────────

/// Apply each action to the manifest at `path` in order, filling in
/// `outcome`. Write failures are recorded, never raised.
pub fn apply_tool_actions(actions: &mut [ToolAction], path: &str) {
    if path.is_empty() {
        for action in actions.iter_mut() {
            action.outcome = "skipped: manifest path not configured".into();
        }
        return;
    }
    let path = Path::new(path);

    for action in actions.iter_mut() {
        action.outcome = match action.action.as_str() {
            "add" | "update" if action.section.is_empty() => "skipped: section required".into(),
            "add" | "update" => {
                match manifest::add_tool(path, &action.section, &action.name, &action.description) {
                    Ok(change) => change.as_str().to_string(),
                    Err(e) => format!("error: {e}"),
                }
            }
            "remove" if action.section.is_empty() => "skipped: section required".into(),
            "remove" => match manifest::remove_tool(path, &action.section, &action.name) {
                Ok(change) => change.as_str().to_string(),
                Err(e) => format!("error: {e}"),
            },
            _ => "skipped: no-op".into(),
        };
        debug!(
            action = %action.action,
            tool = %action.name,
            outcome = %action.outcome,
            "Applied tool action"
        );
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human-readable summary appended to the chat history.
pub fn format_summary(reflection: &CommandReflection) -> String {
    let mut out = String::from("Reflection Summary\n");
    out.push_str(&format!("Command: {}\n", reflection.command));
    out.push_str(&format!("Exit Code: {}\n", reflection.exit_code));
    if !reflection.lessons_learned.is_empty() {
        out.push_str(&format!("Lessons Learned: {}\n", reflection.lessons_learned));
    }
    if !reflection.alternative.is_empty() {
        out.push_str(&format!("Proposed Alternative: {}\n", reflection.alternative));
        if !reflection.alternative_rationale.is_empty() {
            out.push_str(&format!("Rationale: {}\n", reflection.alternative_rationale));
        }
    }
    if !reflection.suggested_actions.is_empty() {
        out.push_str("Tool Actions:\n");
        for a in &reflection.suggested_actions {
            out.push_str(&format!(
                "- {} {} in section {} ({}): {}\n",
                title_case(&a.action),
                a.name,
                a.section,
                a.outcome,
                a.reason
            ));
        }
    }
    out.trim_end_matches('\n').to_string()
}

// ── Pipeline ───────────────────────────────────────────────────────

#[derive(Debug)]
struct PipelineState {
    pending: VecDeque<ReflectionTask>,
    log: ReflectionLog,
    /// Summaries produced by the background drain, not yet collected.
    finished: Vec<String>,
}

/// The pending queue and the log it feeds.
///
/// Clones share one queue. [`spawn_drain`](Self::spawn_drain) works through
/// the queue on a background task under the pipeline's own cancellation
/// token, so neither the prompt nor an interrupted request waits on it.
#[derive(Debug, Clone)]
pub struct ReflectionPipeline {
    state: Arc<Mutex<PipelineState>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl ReflectionPipeline {
    /// An empty pipeline persisting to `log_path`. Touches no files.
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            state: Arc::new(Mutex::new(PipelineState {
                pending: VecDeque::new(),
                log: ReflectionLog::new(log_path),
                finished: Vec::new(),
            })),
            worker: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load earlier reflections from disk.
    pub fn load_log(&self) -> Result<usize, String> {
        let mut state = self.state();
        let count = state.log.load()?;
        info!(count, path = %state.log.path().display(), "Reflection log loaded");
        Ok(count)
    }

    /// Queue a finished command. Blank commands are ignored.
    pub fn enqueue(&self, history: CommandExecHistory) {
        if history.command.trim().is_empty() {
            return;
        }
        debug!(command = %history.command, "Queued reflection");
        self.state().pending.push_back(ReflectionTask { history });
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn log_len(&self) -> usize {
        self.state().log.len()
    }

    /// A copy of the logged reflections, oldest first.
    pub fn log_entries(&self) -> Vec<CommandReflection> {
        self.state().log.entries().to_vec()
    }

    /// Summaries finished by the background drain since the last call.
    pub fn take_finished(&self) -> Vec<String> {
        std::mem::take(&mut self.state().finished)
    }

    /// Reflect on every queued command in FIFO order and return one summary
    /// per successful reflection.
    ///
    /// A task whose reflection fails because `cancel` fired goes back to
    /// the front of the queue and the drain stops.
    pub async fn drain(
        &self,
        model: &dyn ChatModel,
        model_name: &str,
        manifest_path: &str,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let mut summaries = Vec::new();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = self.state().pending.pop_front();
            let Some(task) = next else {
                break;
            };
            match reflect(model, model_name, manifest_path, &task, cancel).await {
                Ok(mut reflection) => {
                    apply_tool_actions(&mut reflection.suggested_actions, manifest_path);
                    summaries.push(format_summary(&reflection));
                    self.state().log.record(reflection);
                }
                Err(_) if cancel.is_cancelled() => {
                    debug!(command = %task.history.command, "Reflection interrupted, requeued");
                    self.state().pending.push_front(task);
                    break;
                }
                Err(e) => warn!("Reflection failed for command '{}': {e}", task.history.command),
            }
        }
        summaries
    }

    /// Drain the queue on a background task. Does nothing when the queue is
    /// empty or a drain is already running. Must be called from within a
    /// Tokio runtime.
    pub fn spawn_drain(&self, model: Arc<dyn ChatModel>, model_name: String, manifest_path: String) {
        if self.pending_len() == 0 {
            return;
        }
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let pipeline = self.clone();
        let cancel = self.shutdown.clone();
        *worker = Some(tokio::spawn(async move {
            let summaries = pipeline
                .drain(model.as_ref(), &model_name, &manifest_path, &cancel)
                .await;
            if !summaries.is_empty() {
                info!(count = summaries.len(), "Reflections finished");
                pipeline.state().finished.extend(summaries);
            }
        }));
    }

    /// Wait for the running background drain, if any.
    pub async fn wait_idle(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Reflection worker failed: {e}");
        }
    }

    /// Stop the background drain. Interrupted tasks stay queued.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.wait_idle().await;
    }
}

async fn reflect(
    model: &dyn ChatModel,
    model_name: &str,
    manifest_path: &str,
    task: &ReflectionTask,
    cancel: &CancellationToken,
) -> Result<CommandReflection, String> {
    let messages = build_request(&task.history, manifest_path)?;
    let response = model
        .complete(model_name, &messages, cancel)
        .await
        .map_err(|e| e.to_string())?;
    parse_reflection(&task.history, &response)
}
