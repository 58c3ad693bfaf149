//! `panepilot`: an AI companion living in your tmux window.
//!
//! Runs in one pane and works in a second "exec" pane of the same window.
//! Started outside tmux, it opens a session and re-runs itself there.
//!
//! # Examples
//!
//! ```sh
//! # Interactive
//! panepilot
//!
//! # Start with a request
//! panepilot "why is the disk full?"
//! panepilot --file task.md --model openai/gpt-4o
//!
//! # Edit the tools manifest
//! panepilot tools add rg --section Search --description "fast grep"
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use panepilot::prelude::*;
use panepilot_cli::commands::{Outcome, handle_input};
use panepilot_cli::console::{self, ConsoleHandler};
use panepilot_cli::launch::{relaunch_command, relaunch_in_tmux};
use panepilot_cli::tools::{self, ToolsAction};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long exit waits for a running reflection before abandoning it.
const REFLECTION_EXIT_GRACE: Duration = Duration::from_secs(5);

/// AI companion for your tmux window.
#[derive(Parser)]
#[command(name = "panepilot", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,

    /// Initial request. Words are joined with spaces.
    request: Vec<String>,

    /// Read the initial request from a file.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Model for this session: a name from `models`, or a model id.
    #[arg(long)]
    model: Option<String>,

    /// Config file. Defaults to `<config dir>/panepilot/config.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Manage the tools manifest.
    #[command(hide = true)]
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

/// Log to `<state dir>/panepilot.log` so output never mixes with the prompt.
fn init_logging(state_dir: &Path, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PANEPILOT_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    if let Err(e) = std::fs::create_dir_all(state_dir) {
        eprintln!("Warning: logging disabled, cannot create {}: {e}", state_dir.display());
        return;
    }
    let path = state_dir.join("panepilot.log");
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: logging disabled, cannot open {}: {e}", path.display());
            return;
        }
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();
}

/// The positional words, then the file contents, if either is present.
fn initial_request(cli: &Cli) -> Result<Option<String>, String> {
    let mut parts = Vec::new();
    let words = cli.request.join(" ");
    if !words.trim().is_empty() {
        parts.push(words.trim().to_string());
    }
    if let Some(path) = &cli.file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        if !content.trim().is_empty() {
            parts.push(content.trim().to_string());
        }
    }
    Ok((!parts.is_empty()).then(|| parts.join("\n\n")))
}

/// Run one line on a task so Ctrl+C can cancel it. The orchestrator is
/// moved into the task and handed back. Status is cleared as soon as the
/// interrupt arrives: the turn loop and command waits check it, which stops
/// busy-wait continuations that run outside the cancelled scope.
async fn run_line(
    mut orchestrator: Orchestrator,
    line: String,
    handler: &dyn EventHandler,
) -> (Orchestrator, Result<Outcome, String>) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let status = orchestrator.session.status.clone();
    let mut task = tokio::spawn(async move {
        let outcome = handle_input(&mut orchestrator, &line, &token).await;
        (orchestrator, outcome)
    });

    let interrupted = tokio::select! {
        joined = &mut task => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match interrupted {
        Some(joined) => joined,
        None => {
            println!("\nReceived interrupt signal, canceling operation...");
            cancel.cancel();
            status.clear();
            let joined = task.await;
            status.clear();
            handler.on_event(&AgentEvent::Cancelled);
            joined.map(|(orchestrator, _)| (orchestrator, Ok(Outcome::Quiet)))
        }
    };
    match joined {
        Ok(result) => result,
        Err(e) => fail(format!("request task failed: {e}")),
    }
}

fn report(outcome: &Result<Outcome, String>) {
    match outcome {
        Ok(Outcome::Reply(text)) => console::print_reply(text),
        Ok(Outcome::Quiet | Outcome::Exit) => {}
        Err(e) => console::print_error(e),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(CliCommand::Tools { action }) = &cli.command {
        let config = AgentConfig::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
        match tools::run(action, &config.tools_manifest_path) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(e),
        }
        return;
    }

    if !TmuxClient::inside_tmux() {
        let program = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "panepilot".to_string());
        let args: Vec<String> = std::env::args().skip(1).collect();
        let command = relaunch_command(&program, &args);
        if let Err(e) = relaunch_in_tmux(&TmuxClient::new(), &command).await {
            fail(e);
        }
        return;
    }

    let mut config = AgentConfig::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    if let Some(model) = &cli.model
        && !config.models.contains_key(model)
    {
        config.set_model(model.clone());
    }
    config.debug |= cli.debug;

    let state_dir = AgentConfig::state_dir();
    init_logging(&state_dir, config.debug);

    let initial = initial_request(&cli).unwrap_or_else(|e| fail(e));
    let policy = CommandPolicy::new(&config.whitelist_patterns, &config.blacklist_patterns)
        .unwrap_or_else(|e| fail(e));

    let tmux = TmuxClient::new();
    let chat_pane = tmux.current_pane_id().unwrap_or_else(|e| fail(e));

    let mut session = Session::new(config, chat_pane);
    if let Some(model) = &cli.model
        && session.config.models.contains_key(model)
    {
        session.switch_model(model).unwrap_or_else(|e| fail(e));
    }
    let (provider, api_key) = session.provider().unwrap_or_else(|e| fail(e));
    info!(provider = provider.label(), model = %session.model(), "Starting panepilot");
    let client = OpenAiCompatClient::new(provider, api_key)
        .unwrap_or_else(|e| fail(format!("failed to create API client: {e}")));

    let handler = Arc::new(
        CompositeEventHandler::new()
            .with(ConsoleHandler)
            .with(LoggingHandler),
    );
    let mut orchestrator = Orchestrator::new(
        session,
        Arc::new(client),
        Arc::new(tmux),
        Arc::new(TerminalConfirmer::new(policy)),
    )
    .with_countdown(Arc::new(TerminalCountdown))
    .with_handler(handler.clone());

    match orchestrator.session.reflections.load_log() {
        Ok(count) => info!(count, "Loaded reflection log"),
        Err(e) => warn!("Reflection log not loaded: {e}"),
    }
    if let Err(e) = orchestrator.init_exec_pane().await {
        fail(e);
    }

    let mut editor = DefaultEditor::new().unwrap_or_else(|e| fail(e));
    let history_path = state_dir.join("history.txt");
    if history_path.exists()
        && let Err(e) = editor.load_history(&history_path)
    {
        warn!("Failed to load input history: {e}");
    }

    if let Some(request) = initial {
        let (returned, outcome) = run_line(orchestrator, request, handler.as_ref()).await;
        orchestrator = returned;
        report(&outcome);
    }

    loop {
        let prompt = console::prompt(
            orchestrator.session.status.get(),
            orchestrator.session.watch_mode,
        );
        let line = match tokio::task::block_in_place(|| editor.readline(&prompt)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                error!("Input error: {e}");
                console::print_error(&format!("Input error: {e}"));
                break;
            }
        };
        if !line.trim().is_empty()
            && let Err(e) = editor.add_history_entry(line.as_str())
        {
            warn!("Failed to record input history: {e}");
        }

        let (returned, outcome) = run_line(orchestrator, line, handler.as_ref()).await;
        orchestrator = returned;
        report(&outcome);
        if matches!(outcome, Ok(Outcome::Exit)) {
            break;
        }
    }

    if let Err(e) = editor.save_history(&history_path) {
        warn!("Failed to save input history: {e}");
    }

    let reflections = &orchestrator.session.reflections;
    if tokio::time::timeout(REFLECTION_EXIT_GRACE, reflections.wait_idle())
        .await
        .is_err()
    {
        warn!(
            pending = reflections.pending_len(),
            "Reflections still running at exit, abandoning"
        );
    }
    reflections.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_words_are_joined() {
        let cli = Cli::parse_from(["panepilot", "why", "is", "disk", "full?"]);
        assert_eq!(
            initial_request(&cli).unwrap().as_deref(),
            Some("why is disk full?")
        );
        let empty = Cli::parse_from(["panepilot", "--debug"]);
        assert!(empty.debug);
        assert_eq!(initial_request(&empty).unwrap(), None);
    }

    #[test]
    fn file_request_follows_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.md");
        std::fs::write(&path, "\nfix the flaky test\n").unwrap();

        let cli = Cli::parse_from([
            "panepilot",
            "-f",
            path.to_str().unwrap(),
            "please",
        ]);
        assert_eq!(
            initial_request(&cli).unwrap().as_deref(),
            Some("please\n\nfix the flaky test")
        );

        let missing = Cli::parse_from(["panepilot", "--file", "/nonexistent/task.md"]);
        assert!(initial_request(&missing).is_err());
    }

    #[test]
    fn hidden_tools_subcommand_parses() {
        let cli = Cli::parse_from([
            "panepilot",
            "tools",
            "add",
            "rg",
            "--section",
            "Search",
            "--description",
            "fast grep",
        ]);
        let Some(CliCommand::Tools { action }) = cli.command else {
            panic!("expected the tools subcommand");
        };
        assert_eq!(
            action,
            ToolsAction::Add {
                name: "rg".into(),
                section: "Search".into(),
                description: "fast grep".into(),
            }
        );

        let cli = Cli::parse_from(["panepilot", "tools", "list"]);
        assert!(matches!(
            cli.command,
            Some(CliCommand::Tools { action: ToolsAction::List })
        ));
        assert!(Cli::try_parse_from(["panepilot", "tools", "remove", "rg"]).is_err());

        let request = Cli::parse_from(["panepilot", "list", "my", "tools"]);
        assert!(request.command.is_none());
        assert_eq!(request.request, vec!["list", "my", "tools"]);
    }

    #[test]
    fn model_and_config_flags_parse() {
        let cli = Cli::parse_from(["panepilot", "--model", "openai/gpt-4o", "--config", "c.json"]);
        assert_eq!(cli.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
    }
}
