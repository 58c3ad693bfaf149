//! Prepared exec panes.
//!
//! Preparing a pane replaces the shell prompt with a recognizable marker
//! that carries the previous command's exit status:
//!
//! ```text
//! [user@host ~/src][0]» cargo test
//! ...output...
//! [user@host ~/src][101]»
//! ```
//!
//! Once a pane is prepared the agent can split its content into
//! per-command records ([`parse_exec_history`]) and run a command to
//! completion, reading back its output and exit code
//! ([`exec_wait_capture`]). The exit code of a command is carried by the
//! prompt printed *after* it.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Pane;

/// How often a running command's pane is polled for the next prompt.
pub const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polling bounds for [`exec_wait_capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecWait {
    pub poll: Duration,
    /// Stop waiting when no prompt has returned after this long.
    pub timeout: Duration,
}

impl ExecWait {
    pub fn new(timeout: Duration) -> Self {
        Self {
            poll: EXEC_POLL_INTERVAL,
            timeout,
        }
    }
}

/// Shells whose prompt can be instrumented.
pub const SUPPORTED_SHELLS: &[&str] = &["bash", "zsh", "fish"];

static PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[[^\[\]]*\]\[(-?\d+)\]» ?(.*)$").expect("valid prompt regex")
});

/// One command run in a prepared pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecHistory {
    pub command: String,
    pub output: String,
    pub code: i32,
}

/// Shell command that installs the marker prompt in `shell`.
pub fn prompt_setup_command(shell: &str) -> Result<&'static str, String> {
    match shell {
        "bash" => Ok(r"export PS1='[\u@\h \w][$?]» '"),
        "zsh" => Ok(r"setopt PROMPT_SUBST; export PROMPT='[%n@%m %~][%?]» '"),
        "fish" => Ok(
            r"function fish_prompt; set -l s $status; printf '[%s@%s %s][%s]» ' $USER (prompt_hostname) (prompt_pwd) $s; end",
        ),
        other => Err(format!(
            "Unsupported shell '{other}'. Supported shells: {}",
            SUPPORTED_SHELLS.join(", ")
        )),
    }
}

/// Parse a marker prompt line into `(previous exit code, typed command)`.
pub fn parse_prompt_line(line: &str) -> Option<(i32, &str)> {
    let caps = PROMPT_RE.captures(line.trim_end())?;
    let code = caps.get(1)?.as_str().parse().ok()?;
    let command = caps.get(2).map_or("", |m| m.as_str());
    Some((code, command.trim()))
}

/// Whether the last non-blank line of `content` is a marker prompt.
pub fn is_prepared_content(content: &str) -> bool {
    last_prompt(content).is_some()
}

fn last_prompt(content: &str) -> Option<(i32, &str)> {
    content
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(parse_prompt_line)
}

/// Whether the last non-blank line is an empty marker prompt, i.e. the
/// shell is waiting for input.
pub fn is_idle_prompt(content: &str) -> bool {
    last_prompt(content).is_some_and(|(_, typed)| typed.is_empty())
}

/// Split prepared pane content into completed commands.
///
/// A command is complete once a later prompt reports its exit code. A
/// trailing command without a following prompt (still running) is dropped,
/// and so are prompts where nothing was typed.
pub fn parse_exec_history(content: &str) -> Vec<CommandExecHistory> {
    let mut history = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in content.lines() {
        if let Some((code, command)) = parse_prompt_line(line) {
            if let Some((prev_command, output)) = current.take() {
                history.push(CommandExecHistory {
                    command: prev_command,
                    output: output.join("\n").trim_end().to_string(),
                    code,
                });
            }
            if !command.is_empty() {
                current = Some((command.to_string(), Vec::new()));
            }
        } else if let Some((_, output)) = current.as_mut() {
            output.push(line);
        }
    }
    history
}

/// Delay between installing the prompt and clearing the pane.
pub const PREPARE_SETTLE: Duration = Duration::from_millis(500);

/// Install the marker prompt in `pane_id` for `shell`, then clear the
/// pane so earlier output is not mistaken for history.
pub async fn prepare_pane(pane: &dyn Pane, pane_id: &str, shell: &str) -> Result<(), String> {
    let setup = prompt_setup_command(shell)?;
    pane.send_text(pane_id, setup, true).await?;
    tokio::time::sleep(PREPARE_SETTLE).await;
    pane.clear_pane(pane_id).await?;
    info!(pane = pane_id, shell, "Exec pane prepared");
    Ok(())
}

/// Send `command` to a prepared pane and wait for the next prompt.
///
/// Returns the record for that command. The wait ends early when `cancel`
/// fires, when `abandoned` returns true at a poll, or after
/// `wait.timeout`. The command itself keeps running in the pane.
pub async fn exec_wait_capture(
    pane: &dyn Pane,
    pane_id: &str,
    command: &str,
    max_lines: usize,
    wait: ExecWait,
    cancel: &CancellationToken,
    abandoned: impl Fn() -> bool,
) -> Result<CommandExecHistory, String> {
    let command = command.trim();
    let before = pane.capture(pane_id, max_lines).await?;

    pane.send_text(pane_id, command, true).await?;
    debug!(pane = pane_id, command, "Waiting for command to finish");
    let deadline = tokio::time::Instant::now() + wait.timeout;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err("command wait cancelled".into()),
            _ = tokio::time::sleep(wait.poll) => {}
        }
        if abandoned() {
            return Err("command wait abandoned".into());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(pane = pane_id, command, "Command still running, giving up");
            return Err(format!(
                "'{command}' still running after {}s",
                wait.timeout.as_secs()
            ));
        }

        let content = pane.capture(pane_id, max_lines).await?;
        if content == before || !is_idle_prompt(&content) {
            continue;
        }
        if let Some(last) = parse_exec_history(&content).pop()
            && last.command == command
        {
            return Ok(last);
        }
    }
}
