//! Slash commands and dispatch of one line of user input.
//!
//! A line starting with `/` names a command by any unambiguous prefix of
//! its name (`/w` is kept as an alias of `/watch`). Anything else is a
//! request for the agent.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use panepilot::agent::config::ALLOWED_OVERRIDE_KEYS;
use panepilot::pane::prepared::SUPPORTED_SHELLS;
use panepilot::prelude::*;
use panepilot::reflection::manifest::list_tools;
use tokio_util::sync::CancellationToken;

/// Command names in help order.
const COMMAND_NAMES: &[&str] = &[
    "/help", "/info", "/clear", "/reset", "/prepare", "/watch", "/squash", "/config", "/model",
    "/tools", "/exit",
];

pub const HELP_TEXT: &str = "\
Available commands:
  /help                       Show this help
  /info                       Show session, exec pane, and context usage
  /clear                      Clear chat history and the chat pane
  /reset                      Reset status, chat history, and both panes
  /prepare [bash|zsh|fish]    Instrument the exec pane prompt
  /watch <description>        Watch the exec pane (alias /w)
  /squash                     Summarize chat history now
  /config                     Show effective configuration
  /config set <key> <value>   Override a setting for this session
  /model [name]               List model configurations, or switch to one
  /tools                      Show the tools manifest
  /exit                       Quit (also: exit, quit)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Info,
    Clear,
    Reset,
    Prepare(Option<String>),
    Watch(String),
    Squash,
    Config,
    ConfigSet { key: String, value: String },
    Model(Option<String>),
    Tools,
    Exit,
}

/// What the input loop does after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Print this text and keep reading.
    Reply(String),
    /// Nothing more to print; events already covered it.
    Quiet,
    Exit,
}

fn resolve_name(word: &str) -> Result<&'static str, String> {
    if word == "/w" {
        return Ok("/watch");
    }
    if let Some(exact) = COMMAND_NAMES.iter().copied().find(|name| *name == word) {
        return Ok(exact);
    }
    let matches: Vec<&'static str> = COMMAND_NAMES
        .iter()
        .copied()
        .filter(|name| word.len() > 1 && name.starts_with(word))
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(format!(
            "Unknown command: {word}. Type '/help' to see available commands."
        )),
        many => Err(format!(
            "Ambiguous command: {word} matches {}",
            many.join(", ")
        )),
    }
}

/// Parse a line that starts with `/`.
pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };

    match resolve_name(word)? {
        "/help" => Ok(Command::Help),
        "/info" => Ok(Command::Info),
        "/clear" => Ok(Command::Clear),
        "/reset" => Ok(Command::Reset),
        "/squash" => Ok(Command::Squash),
        "/tools" => Ok(Command::Tools),
        "/exit" => Ok(Command::Exit),
        "/prepare" => {
            if rest.is_empty() {
                return Ok(Command::Prepare(None));
            }
            if !SUPPORTED_SHELLS.contains(&rest) {
                return Err(format!(
                    "Shell '{rest}' is not supported. Supported shells are: {}",
                    SUPPORTED_SHELLS.join(", ")
                ));
            }
            Ok(Command::Prepare(Some(rest.to_string())))
        }
        "/model" => Ok(Command::Model((!rest.is_empty()).then(|| rest.to_string()))),
        "/watch" => {
            if rest.is_empty() {
                return Err("Usage: /watch <description>".to_string());
            }
            Ok(Command::Watch(rest.to_string()))
        }
        "/config" => {
            if rest.is_empty() {
                return Ok(Command::Config);
            }
            let mut parts = rest.splitn(3, char::is_whitespace);
            let sub = parts.next().unwrap_or_default();
            let key = parts.next().unwrap_or_default().trim();
            let value = parts.next().unwrap_or_default().trim();
            if sub != "set" || key.is_empty() || value.is_empty() {
                return Err("Usage: /config set <key> <value>".to_string());
            }
            Ok(Command::ConfigSet {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        other => Err(format!(
            "Unknown command: {other}. Type '/help' to see available commands."
        )),
    }
}

/// Handle one line of input: a slash command, an exit word, or a request.
pub async fn handle_input(
    orchestrator: &mut Orchestrator,
    input: &str,
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Outcome::Quiet);
    }
    if input == "exit" || input == "quit" {
        return Ok(Outcome::Exit);
    }
    if input.starts_with('/') {
        let command = parse_command(input)?;
        return execute(orchestrator, command, cancel).await;
    }
    orchestrator.process_message(cancel, input).await;
    Ok(Outcome::Quiet)
}

/// Run a parsed command.
pub async fn execute(
    orchestrator: &mut Orchestrator,
    command: Command,
    cancel: &CancellationToken,
) -> Result<Outcome, String> {
    match command {
        Command::Help => Ok(Outcome::Reply(HELP_TEXT.to_string())),
        Command::Info => Ok(Outcome::Reply(info_text(&orchestrator.session))),
        Command::Clear => {
            orchestrator.clear_history();
            let chat_pane = orchestrator.session.chat_pane_id.clone();
            orchestrator.pane().clear_pane(&chat_pane).await?;
            Ok(Outcome::Quiet)
        }
        Command::Reset => {
            orchestrator.session.status.clear();
            orchestrator.session.watch_mode = false;
            orchestrator.clear_history();
            let chat_pane = orchestrator.session.chat_pane_id.clone();
            let exec_pane = orchestrator.session.exec_pane.id.clone();
            orchestrator.pane().clear_pane(&chat_pane).await?;
            if !exec_pane.is_empty() {
                orchestrator.pane().clear_pane(&exec_pane).await?;
            }
            Ok(Outcome::Quiet)
        }
        Command::Prepare(shell) => {
            orchestrator.prepare_exec_pane(shell.as_deref()).await?;
            let exec = &orchestrator.session.exec_pane;
            Ok(Outcome::Reply(format!(
                "Exec pane {} prepared for {}",
                exec.id, exec.shell
            )))
        }
        Command::Watch(description) => {
            orchestrator.run_watch(&description, cancel).await;
            Ok(Outcome::Quiet)
        }
        Command::Squash => {
            orchestrator.squash(cancel).await;
            Ok(Outcome::Quiet)
        }
        Command::Config => Ok(Outcome::Reply(config_text(&orchestrator.session))),
        Command::ConfigSet { key, value } => {
            let stored = orchestrator.session.overrides.set(&key, &value)?;
            let shown = match stored {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(Outcome::Reply(format!("Set {key} = {shown}")))
        }
        Command::Model(None) => Ok(Outcome::Reply(models_text(&orchestrator.session))),
        Command::Model(Some(name)) => {
            let (provider, api_key) = orchestrator.session.config.model_provider(&name)?;
            let label = provider.label();
            let client = OpenAiCompatClient::new(provider, api_key)?;
            orchestrator.session.switch_model(&name)?;
            orchestrator.set_model(Arc::new(client));
            tracing::info!(model = %name, provider = label, "Switched model");
            Ok(Outcome::Reply(format!(
                "Switched to {name} ({label}: {})",
                orchestrator.session.model()
            )))
        }
        Command::Tools => {
            let path = orchestrator.session.tools_manifest_path();
            if path.is_empty() {
                return Err("tools_manifest_path is not configured".to_string());
            }
            let tools = list_tools(Path::new(&path))?;
            Ok(Outcome::Reply(tools.trim_end().to_string()))
        }
        Command::Exit => Ok(Outcome::Exit),
    }
}

// ── Reports ────────────────────────────────────────────────────────

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// The `/info` report.
pub fn info_text(session: &Session) -> String {
    let status = match session.status.get() {
        SessionStatus::Idle => "idle",
        other => other.as_str(),
    };
    let exec = &session.exec_pane;
    let used = session.history_tokens();
    let budget = session.max_context_size();
    let percent = if budget == 0 {
        0.0
    } else {
        used as f64 * 100.0 / budget as f64
    };

    let mut out = String::new();
    let _ = writeln!(out, "Status:       {status}");
    let _ = writeln!(out, "Watch mode:   {}", yes_no(session.watch_mode));
    let _ = writeln!(out, "Chat pane:    {}", session.chat_pane_id);
    if exec.id.is_empty() {
        let _ = writeln!(out, "Exec pane:    none");
    } else {
        let _ = writeln!(
            out,
            "Exec pane:    {} ({}, command '{}', prepared: {}, sub-shell: {})",
            exec.id,
            if exec.shell.is_empty() { "unknown shell" } else { exec.shell.as_str() },
            exec.current_command,
            yes_no(exec.is_prepared),
            yes_no(exec.is_sub_shell),
        );
    }
    let _ = writeln!(out, "Model:        {}", session.model());
    let _ = writeln!(
        out,
        "Context:      {used} / {budget} tokens ({percent:.1}%), {} messages",
        session.history.len()
    );
    let _ = write!(
        out,
        "Reflections:  {} logged, {} pending",
        session.reflections.log_len(),
        session.reflections.pending_len()
    );
    out
}

/// The `/model` report: named models with the active one checked, then
/// what requests currently use.
pub fn models_text(session: &Session) -> String {
    let active = session.active_model().map(|(name, _)| name);
    let mut out = String::from("Available models:");
    if session.config.models.is_empty() {
        out.push_str("\n  No model configurations found. Using legacy configuration.");
    }
    for (name, model) in &session.config.models {
        let mark = if active == Some(name.as_str()) { "[x]" } else { "[ ]" };
        let _ = write!(
            out,
            "\n  {mark} {name} ({}: {})",
            model.provider_name(),
            model.model_name()
        );
    }

    match active {
        Some(name) => {
            let _ = write!(out, "\n\nCurrent model:\n  Configuration: {name}");
        }
        None => out.push_str("\n\nCurrent model (legacy):"),
    }
    match session.provider() {
        Ok((provider, _)) => {
            let _ = write!(
                out,
                "\n  Provider: {}\n  Model: {}\n  Endpoint: {}",
                provider.label(),
                session.model(),
                provider.endpoint()
            );
        }
        Err(e) => {
            let _ = write!(out, "\n  Model: {}\n  Provider: unavailable ({e})", session.model());
        }
    }
    out.push_str("\n\nUsage: /model <name> to switch models");
    out
}

/// The `/config` report: effective values, session overrides marked.
pub fn config_text(session: &Session) -> String {
    let effective: [(&str, String); 8] = [
        ("max_capture_lines", session.max_capture_lines().to_string()),
        ("max_context_size", session.max_context_size().to_string()),
        ("wait_interval", session.wait_interval().to_string()),
        ("send_keys_confirm", session.send_keys_confirm().to_string()),
        (
            "paste_multiline_confirm",
            session.paste_multiline_confirm().to_string(),
        ),
        ("exec_confirm", session.exec_confirm().to_string()),
        ("openrouter.model", session.model()),
        ("tools_manifest_path", session.tools_manifest_path()),
    ];
    debug_assert_eq!(effective.len(), ALLOWED_OVERRIDE_KEYS.len());

    let mut out = String::from("Effective configuration:");
    for (key, value) in &effective {
        let marker = if session.overrides.get(key).is_some() {
            " (session)"
        } else {
            ""
        };
        let _ = write!(out, "\n  {key:<24} {value}{marker}");
    }
    let _ = write!(
        out,
        "\nSettable with /config set: {}",
        ALLOWED_OVERRIDE_KEYS.join(", ")
    );
    out
}
