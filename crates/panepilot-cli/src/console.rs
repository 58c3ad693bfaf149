//! Console rendering of agent events and the input prompt.

use crossterm::style::Stylize;
use panepilot::prelude::*;

// ── Events ─────────────────────────────────────────────────────────

/// How a console line is colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Info,
    Warn,
    Error,
    Dim,
}

/// Text for one event, or `None` when the console shows nothing for it.
pub fn render(event: &AgentEvent<'_>) -> Option<(Tone, String)> {
    let line = match event {
        AgentEvent::SquashStarted => (
            Tone::Info,
            "Exceeded context size, squashing history...".to_string(),
        ),
        AgentEvent::SquashFinished {
            summarized,
            tokens_before,
            tokens_after,
        } => (
            Tone::Dim,
            format!(
                "Squashed {summarized} messages ({tokens_before} -> {tokens_after} tokens)"
            ),
        ),
        AgentEvent::SquashFailed(e) => (Tone::Error, format!("Failed to squash history: {e}")),
        AgentEvent::ModelError(e) => (Tone::Error, format!("Failed to get response from AI: {e}")),
        AgentEvent::ParseError(e) => (Tone::Error, format!("Failed to parse AI response: {e}")),
        AgentEvent::GuidelineRetry { .. } => (
            Tone::Warn,
            "AI didn't follow guidelines, trying again...".to_string(),
        ),
        AgentEvent::GuidelineLimitReached { attempts } => (
            Tone::Error,
            format!("Model kept violating the response format after {attempts} attempts"),
        ),
        AgentEvent::ContinuationLimitReached { max } => (
            Tone::Warn,
            format!("Stopped after {max} follow-up turns without finishing"),
        ),
        AgentEvent::Message(text) if text.trim().is_empty() => return None,
        AgentEvent::Message(text) => (Tone::Plain, text.to_string()),
        AgentEvent::CommandProposed(_) => return None,
        AgentEvent::CommandExecuting(cmd) => (Tone::Info, format!("Executing command: {cmd}")),
        AgentEvent::CommandFinished { code, .. } if *code == 0 => return None,
        AgentEvent::CommandFinished { code, .. } => {
            (Tone::Dim, format!("Command exited with code {code}"))
        }
        AgentEvent::KeysPreview(keys) => {
            let mut text = String::from("Keys to send:");
            for key in keys.iter() {
                text.push_str("\n  ");
                text.push_str(key);
            }
            (Tone::Info, text)
        }
        AgentEvent::SendingKeys(keys) => (Tone::Info, format!("Sending keys: {keys}")),
        AgentEvent::PastePreview(content) => {
            (Tone::Info, format!("Content to paste:\n{content}"))
        }
        AgentEvent::Pasting => (Tone::Info, "Pasting...".to_string()),
        AgentEvent::Cancelled => (Tone::Warn, "Operation canceled.".to_string()),
        AgentEvent::ReflectionSummary(summary) => (Tone::Dim, summary.to_string()),
        AgentEvent::Notice(text) => (Tone::Plain, text.to_string()),
    };
    Some(line)
}

/// Prints events to stdout.
pub struct ConsoleHandler;

impl EventHandler for ConsoleHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let Some((tone, text)) = render(event) else {
            return;
        };
        match tone {
            Tone::Plain => println!("{text}"),
            Tone::Info => println!("{}", text.cyan()),
            Tone::Warn => println!("{}", text.yellow()),
            Tone::Error => println!("{}", text.red()),
            Tone::Dim => println!("{}", text.dark_grey()),
        }
    }
}

/// Print a command reply.
pub fn print_reply(text: &str) {
    println!("{text}");
}

/// Print an error from a slash command or startup step.
pub fn print_error(text: &str) {
    println!("{}", text.red());
}

// ── Prompt ─────────────────────────────────────────────────────────

/// The marker shown in the prompt. Watch mode wins over status.
pub fn status_symbol(status: SessionStatus, watch_mode: bool) -> Option<char> {
    if watch_mode {
        return Some('∞');
    }
    match status {
        SessionStatus::Running => Some('▶'),
        SessionStatus::Waiting => Some('?'),
        SessionStatus::Idle => None,
    }
}

/// `panepilot [▶] » `, colored.
pub fn prompt(status: SessionStatus, watch_mode: bool) -> String {
    let mut prompt = "panepilot".green().bold().to_string();
    if let Some(symbol) = status_symbol(status, watch_mode) {
        prompt.push(' ');
        prompt.push_str(&format!("[{symbol}]").magenta().to_string());
    }
    prompt.push_str(&" » ".yellow().to_string());
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_mode_overrides_status_symbol() {
        assert_eq!(status_symbol(SessionStatus::Idle, false), None);
        assert_eq!(status_symbol(SessionStatus::Running, false), Some('▶'));
        assert_eq!(status_symbol(SessionStatus::Waiting, false), Some('?'));
        assert_eq!(status_symbol(SessionStatus::Waiting, true), Some('∞'));
    }

    #[test]
    fn prompt_contains_symbol() {
        let idle = prompt(SessionStatus::Idle, false);
        assert!(idle.contains("panepilot"));
        assert!(idle.contains('»'));
        assert!(!idle.contains('['));
        assert!(prompt(SessionStatus::Running, false).contains("[▶]"));
    }

    #[test]
    fn errors_render_as_errors() {
        let (tone, text) = render(&AgentEvent::ModelError("timeout")).unwrap();
        assert_eq!(tone, Tone::Error);
        assert_eq!(text, "Failed to get response from AI: timeout");

        let (tone, text) = render(&AgentEvent::GuidelineLimitReached { attempts: 3 }).unwrap();
        assert_eq!(tone, Tone::Error);
        assert!(text.contains("3 attempts"));
    }

    #[test]
    fn keys_preview_lists_each_key() {
        let keys = vec!["Escape".to_string(), ":wq".to_string(), "Enter".to_string()];
        let (_, text) = render(&AgentEvent::KeysPreview(&keys)).unwrap();
        assert_eq!(text, "Keys to send:\n  Escape\n  :wq\n  Enter");
    }

    #[test]
    fn quiet_events_render_nothing() {
        assert!(render(&AgentEvent::Message("  ")).is_none());
        assert!(render(&AgentEvent::CommandProposed("ls")).is_none());
        assert!(
            render(&AgentEvent::CommandFinished {
                command: "ls",
                code: 0
            })
            .is_none()
        );
        let (_, text) = render(&AgentEvent::CommandFinished {
            command: "false",
            code: 1,
        })
        .unwrap();
        assert_eq!(text, "Command exited with code 1");
    }
}
