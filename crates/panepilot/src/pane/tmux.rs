//! [`Pane`] implementation backed by the `tmux` command-line client.

use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::{debug, trace};

use super::keys::{SendChunk, plan_send};
use super::{LIST_PANES_FORMAT, Pane, PaneDetails, parse_list_panes};

/// Talks to the tmux server the current process is attached to.
#[derive(Debug, Clone)]
pub struct TmuxClient {
    binary: String,
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self {
            binary: "tmux".into(),
        }
    }
}

impl TmuxClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different tmux executable (for example a wrapper script).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Whether this process runs inside a tmux client.
    pub fn inside_tmux() -> bool {
        std::env::var_os("TMUX_PANE").is_some_and(|v| !v.is_empty())
    }

    /// Run `tmux <args>` and return trimmed-right stdout.
    async fn run(&self, args: &[&str]) -> Result<String, String> {
        trace!(args = ?args, "tmux");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("Failed to run tmux {}: {e}", args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "tmux {} failed ({}): {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }

    async fn send_chunk(&self, pane_id: &str, chunk: &SendChunk) -> Result<(), String> {
        match chunk {
            SendChunk::Literal(text) => {
                self.run(&["send-keys", "-t", pane_id, "-l", text]).await?;
            }
            SendChunk::Keys(tokens) => {
                let mut args = vec!["send-keys", "-t", pane_id];
                args.extend(tokens.iter().map(String::as_str));
                self.run(&args).await?;
            }
            SendChunk::Enter => {
                self.run(&["send-keys", "-t", pane_id, "Enter"]).await?;
            }
        }
        Ok(())
    }
}

impl Pane for TmuxClient {
    fn list_panes<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<Vec<PaneDetails>, String>> {
        Box::pin(async move {
            let output = self
                .run(&["list-panes", "-t", target, "-F", LIST_PANES_FORMAT])
                .await?;
            Ok(parse_list_panes(&output, target))
        })
    }

    fn capture<'a>(
        &'a self,
        pane_id: &'a str,
        max_lines: usize,
    ) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let start = format!("-{max_lines}");
            self.run(&["capture-pane", "-p", "-t", pane_id, "-S", &start])
                .await
        })
    }

    fn send_text<'a>(
        &'a self,
        pane_id: &'a str,
        text: &'a str,
        auto_enter: bool,
    ) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let chunks = plan_send(text, auto_enter);
            debug!(pane = pane_id, chunks = chunks.len(), "Sending keys");
            for chunk in &chunks {
                self.send_chunk(pane_id, chunk).await?;
            }
            Ok(())
        })
    }

    fn create_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            self.run(&[
                "split-window", "-d", "-h", "-t", target, "-P", "-F", "#{pane_id}",
            ])
            .await
        })
    }

    fn create_session(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            self.run(&["new-session", "-d", "-P", "-F", "#{pane_id}"])
                .await
        })
    }

    fn attach_session<'a>(&'a self, pane_id: &'a str) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let status = Command::new(&self.binary)
                .args(["attach-session", "-t", pane_id])
                .status()
                .await
                .map_err(|e| format!("Failed to attach to tmux session: {e}"))?;
            if !status.success() {
                return Err(format!("tmux attach-session exited with {status}"));
            }
            Ok(())
        })
    }

    fn clear_pane<'a>(&'a self, pane_id: &'a str) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            // A full-size split pushes the visible screen into scrollback,
            // where clear-history can reach it.
            let helper = self
                .run(&[
                    "split-window", "-vp", "100", "-t", pane_id, "-P", "-F", "#{pane_id}",
                ])
                .await?;
            self.run(&["clear-history", "-t", pane_id]).await?;
            self.run(&["kill-pane", "-t", &helper]).await?;
            debug!(pane = pane_id, "Pane cleared");
            Ok(())
        })
    }

    fn current_pane_id(&self) -> Result<String, String> {
        std::env::var("TMUX_PANE")
            .ok()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "TMUX_PANE is not set; not running inside tmux".to_string())
    }

    fn current_window_target(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            let pane_id = self.current_pane_id()?;
            self.run(&[
                "display-message", "-p", "-t", &pane_id, "#{session_id}:#{window_index}",
            ])
            .await
        })
    }

    fn window_name(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            let pane_id = self.current_pane_id()?;
            self.run(&["display-message", "-p", "-t", &pane_id, "#W"])
                .await
        })
    }
}
