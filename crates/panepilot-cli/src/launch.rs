//! Starting outside tmux: open a session and run ourselves inside it.

use std::time::Duration;

use panepilot::prelude::*;
use tracing::info;

/// Wait for the new session's shell before typing into it.
const SHELL_STARTUP_DELAY: Duration = Duration::from_secs(1);

/// Quote `arg` for a POSIX shell. Plain words pass through.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// The command line that re-runs `program` with `args`.
pub fn relaunch_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Create a detached session, start `command` in it, then attach.
pub async fn relaunch_in_tmux(pane: &dyn Pane, command: &str) -> Result<(), String> {
    let pane_id = pane.create_session().await?;
    info!(pane = %pane_id, "Created tmux session");
    pane.send_text(&pane_id, command, true).await?;
    tokio::time::sleep(SHELL_STARTUP_DELAY).await;
    pane.send_text(&pane_id, "Enter", false).await?;
    pane.attach_session(&pane_id).await
}
