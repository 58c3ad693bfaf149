//! Asking the user before a risky action.
//!
//! Every command, key sequence, and paste the model proposes goes through
//! a [`Confirmer`] unless its confirmation flag is off. The terminal
//! implementation first consults the [`CommandPolicy`]. A command matched
//! by a whitelist pattern and by no blacklist pattern is approved without
//! prompting. Everything else gets a `[Y]es/No/Edit` prompt read in raw
//! mode by [`line_editor::read_line`].
//!
//! | Answer | Effect |
//! |--------|--------|
//! | empty, `y`, `yes`, `ok`, `sure` | approve |
//! | `n`, `no`, `cancel` | reject |
//! | `e`, `edit` (when allowed) | open `$EDITOR` on the command |
//! | anything else | ask again |
//!
//! Ctrl+C, Ctrl+D on an empty line, and a bare Escape reject.

pub mod editor;
pub mod escape;
pub mod line_editor;

use std::io::{self, BufRead, Write};

use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, warn};

use crate::terminal::raw::{RawModeGuard, StdinBytes, is_interactive};
use line_editor::{LineOutcome, read_line};

// ── Results ────────────────────────────────────────────────────────

/// The user's decision and the command to act on, which differs from the
/// proposal after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub approved: bool,
    pub command: String,
}

impl Confirmation {
    pub fn approved(command: impl Into<String>) -> Self {
        Self {
            approved: true,
            command: command.into(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            approved: false,
            command: String::new(),
        }
    }
}

/// Asks whether a proposed action may proceed.
pub trait Confirmer: Send + Sync {
    /// `command` is shown or matched against the policy, `prompt` is the
    /// question. Editing is offered only when `allow_edit` is set.
    fn confirm<'a>(
        &'a self,
        command: &'a str,
        prompt: &'a str,
        allow_edit: bool,
    ) -> BoxFuture<'a, Confirmation>;
}

// ── Policy ─────────────────────────────────────────────────────────

/// Whitelist and blacklist of command patterns.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

fn compile(patterns: &[String], kind: &str) -> Result<Vec<Regex>, String> {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(|e| format!("Invalid {kind} pattern '{p}': {e}")))
        .collect()
}

impl CommandPolicy {
    /// Compile patterns. Empty patterns are ignored; invalid ones are an
    /// error.
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Result<Self, String> {
        Ok(Self {
            whitelist: compile(whitelist, "whitelist")?,
            blacklist: compile(blacklist, "blacklist")?,
        })
    }

    /// Whether `command` may run without asking.
    pub fn allows(&self, command: &str) -> bool {
        self.whitelist.iter().any(|re| re.is_match(command))
            && !self.blacklist.iter().any(|re| re.is_match(command))
    }
}

// ── Answers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Approve,
    Reject,
    Edit,
    /// Unrecognized; ask again.
    Invalid,
}

pub fn parse_answer(input: &str, allow_edit: bool) -> Answer {
    match input.trim().to_lowercase().as_str() {
        "" | "y" | "yes" | "ok" | "sure" => Answer::Approve,
        "n" | "no" | "cancel" => Answer::Reject,
        "e" | "edit" if allow_edit => Answer::Edit,
        _ => Answer::Invalid,
    }
}

pub fn prompt_label(prompt: &str, allow_edit: bool) -> String {
    if allow_edit {
        format!("{prompt} [Y]es/No/Edit: ")
    } else {
        format!("{prompt} [Y]es/No: ")
    }
}

// ── Terminal confirmer ─────────────────────────────────────────────

/// Prompts on the controlling terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalConfirmer {
    policy: CommandPolicy,
}

impl TerminalConfirmer {
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }
}

impl Confirmer for TerminalConfirmer {
    fn confirm<'a>(
        &'a self,
        command: &'a str,
        prompt: &'a str,
        allow_edit: bool,
    ) -> BoxFuture<'a, Confirmation> {
        Box::pin(async move {
            if self.policy.allows(command) {
                debug!(command, "Approved by whitelist");
                return Confirmation::approved(command);
            }
            let command = command.to_string();
            let prompt = prompt.to_string();
            let joined =
                tokio::task::spawn_blocking(move || prompt_loop(&command, &prompt, allow_edit))
                    .await;
            match joined {
                Ok(Ok(confirmation)) => confirmation,
                Ok(Err(e)) => {
                    warn!("Confirmation prompt failed: {e}");
                    Confirmation::rejected()
                }
                Err(e) => {
                    warn!("Confirmation task failed: {e}");
                    Confirmation::rejected()
                }
            }
        })
    }
}

/// Read one answer. `None` means the prompt was cancelled.
fn read_answer(label: &str) -> io::Result<Option<String>> {
    if is_interactive() {
        let _raw = RawModeGuard::enable()?;
        let mut input = StdinBytes::new();
        let mut out = io::stdout();
        return Ok(match read_line(&mut input, &mut out, label)? {
            LineOutcome::Submitted(text) => Some(text),
            LineOutcome::Cancelled => None,
        });
    }

    let mut out = io::stdout();
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn prompt_loop(command: &str, prompt: &str, allow_edit: bool) -> io::Result<Confirmation> {
    let label = prompt_label(prompt, allow_edit);
    loop {
        let Some(answer) = read_answer(&label)? else {
            return Ok(Confirmation::rejected());
        };
        match parse_answer(&answer, allow_edit) {
            Answer::Approve => return Ok(Confirmation::approved(command)),
            Answer::Reject => return Ok(Confirmation::rejected()),
            Answer::Edit => {
                return Ok(match editor::edit_command(command) {
                    Ok(edited) if !edited.is_empty() => Confirmation::approved(edited),
                    Ok(_) => Confirmation::rejected(),
                    Err(e) => {
                        println!("Error: {e}");
                        Confirmation::rejected()
                    }
                });
            }
            Answer::Invalid => continue,
        }
    }
}
