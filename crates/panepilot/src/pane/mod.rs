//! The terminal multiplexer seam.
//!
//! The agent never shells out to tmux directly. It goes through the
//! [`Pane`] trait, whose production implementation is
//! [`TmuxClient`](tmux::TmuxClient). Tests substitute a recording pane.
//!
//! - [`keys`]: splitting text into literal runs and named key tokens.
//! - [`tmux`]: the `tmux` CLI client.
//! - [`exec`]: choosing and refreshing the exec pane.
//! - [`prepared`]: prompt instrumentation, exec history parsing, and
//!   run-and-wait for prepared panes.
//! - [`snapshot`]: the XML rendering of the window sent to the model.

pub mod exec;
pub mod keys;
pub mod prepared;
pub mod snapshot;
pub mod tmux;

use futures::future::BoxFuture;

/// Shells that count as a local login shell. Any other foreground command
/// (ssh, docker, a REPL) makes the pane a sub-shell.
pub const KNOWN_SHELLS: &[&str] = &[
    "bash", "zsh", "fish", "sh", "dash", "ksh", "tcsh", "csh", "nu", "pwsh",
];

/// `list-panes` format string. Field order matches [`parse_list_panes`].
pub const LIST_PANES_FORMAT: &str =
    "#{pane_id},#{pane_active},#{pane_pid},#{pane_current_command},#{history_size},#{history_limit}";

/// Metadata and last captured content of one pane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneDetails {
    pub id: String,
    pub is_active: bool,
    pub pid: u32,
    pub current_command: String,
    pub history_size: usize,
    pub history_limit: usize,
    pub is_sub_shell: bool,
    /// The prompt is instrumented so exit codes are visible.
    pub is_prepared: bool,
    pub shell: String,
    pub os: String,
    pub content: String,
}

/// Capabilities the agent needs from the multiplexer.
///
/// Methods return boxed futures so the trait can be shared as
/// `Arc<dyn Pane>`.
pub trait Pane: Send + Sync {
    /// Panes of `target` (a window target or a single `%id`).
    fn list_panes<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<Vec<PaneDetails>, String>>;

    /// The last `max_lines` lines of scrollback plus the visible screen.
    fn capture<'a>(&'a self, pane_id: &'a str, max_lines: usize)
    -> BoxFuture<'a, Result<String, String>>;

    /// Type `text` into the pane, optionally pressing Enter after each line.
    fn send_text<'a>(
        &'a self,
        pane_id: &'a str,
        text: &'a str,
        auto_enter: bool,
    ) -> BoxFuture<'a, Result<(), String>>;

    /// Split a new pane off `target` and return its id.
    fn create_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, String>>;

    /// Start a detached session and return its first pane id.
    fn create_session(&self) -> BoxFuture<'_, Result<String, String>>;

    fn attach_session<'a>(&'a self, pane_id: &'a str) -> BoxFuture<'a, Result<(), String>>;

    /// Clear the visible screen and scrollback of a pane.
    fn clear_pane<'a>(&'a self, pane_id: &'a str) -> BoxFuture<'a, Result<(), String>>;

    /// Id of the pane this process runs in.
    fn current_pane_id(&self) -> Result<String, String>;

    /// `session_id:window_index` of the current pane.
    fn current_window_target(&self) -> BoxFuture<'_, Result<String, String>>;

    fn window_name(&self) -> BoxFuture<'_, Result<String, String>>;
}

/// Whether `command` is something other than a local shell.
pub fn is_sub_shell(command: &str) -> bool {
    let name = command.trim().trim_start_matches('-');
    !KNOWN_SHELLS.contains(&name)
}

/// Parse `list-panes -F LIST_PANES_FORMAT` output. When `target` is a pane
/// id (`%N`) only that pane is kept. Malformed lines are skipped.
pub fn parse_list_panes(output: &str, target: &str) -> Vec<PaneDetails> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(6, ',').collect();
            let [id, active, pid, command, history_size, history_limit] = parts.as_slice() else {
                tracing::warn!("Invalid pane details line: {line}");
                return None;
            };
            if target.starts_with('%') && *id != target {
                return None;
            }
            Some(PaneDetails {
                id: id.to_string(),
                is_active: *active == "1",
                pid: pid.parse().unwrap_or(0),
                current_command: command.to_string(),
                history_size: history_size.parse().unwrap_or(0),
                history_limit: history_limit.parse().unwrap_or(0),
                is_sub_shell: is_sub_shell(command),
                ..Default::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shells_are_not_sub_shells() {
        assert!(!is_sub_shell("zsh"));
        assert!(!is_sub_shell("-bash"));
        assert!(is_sub_shell("ssh"));
        assert!(is_sub_shell("python3"));
    }

    #[test]
    fn parses_list_panes_output() {
        let output = "%0,1,4242,zsh,120,2000\n%3,0,4300,ssh,10,2000\nbroken line\n";
        let panes = parse_list_panes(output, "$1:0");
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[0].id, "%0");
        assert!(panes[0].is_active);
        assert_eq!(panes[0].pid, 4242);
        assert_eq!(panes[0].history_limit, 2000);
        assert!(!panes[0].is_sub_shell);
        assert!(panes[1].is_sub_shell);
    }

    #[test]
    fn pane_target_filters_to_that_pane() {
        let output = "%0,1,1,zsh,0,2000\n%3,0,2,bash,0,2000";
        let panes = parse_list_panes(output, "%3");
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].current_command, "bash");
    }
}
