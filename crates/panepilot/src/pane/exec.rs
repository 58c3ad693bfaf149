//! Choosing the exec pane and keeping its details fresh.

use tracing::{debug, info};

use super::prepared::is_prepared_content;
use super::{Pane, PaneDetails};

/// Find the first pane in the current window that is not the chat pane,
/// creating one when the chat pane is alone.
pub async fn init_exec_pane(
    pane: &dyn Pane,
    chat_pane_id: &str,
    max_lines: usize,
) -> Result<PaneDetails, String> {
    let target = pane.current_window_target().await?;
    let existing = pane
        .list_panes(&target)
        .await?
        .into_iter()
        .find(|p| p.id != chat_pane_id);

    let mut details = match existing {
        Some(found) => {
            debug!(pane = %found.id, "Using existing exec pane");
            found
        }
        None => {
            let id = pane.create_pane(&target).await?;
            info!(pane = %id, "Created exec pane");
            PaneDetails {
                id,
                ..Default::default()
            }
        }
    };

    refresh_pane(pane, &mut details, max_lines).await?;
    Ok(details)
}

/// Re-read metadata and content of `details.id`.
pub async fn refresh_pane(
    pane: &dyn Pane,
    details: &mut PaneDetails,
    max_lines: usize,
) -> Result<(), String> {
    if let Some(fresh) = pane.list_panes(&details.id).await?.into_iter().next() {
        details.is_active = fresh.is_active;
        details.pid = fresh.pid;
        details.current_command = fresh.current_command;
        details.history_size = fresh.history_size;
        details.history_limit = fresh.history_limit;
        details.is_sub_shell = fresh.is_sub_shell;
    }
    details.content = pane.capture(&details.id, max_lines).await?;
    details.is_prepared = is_prepared_content(&details.content);
    if !details.is_sub_shell {
        details.shell = details.current_command.trim_start_matches('-').to_string();
    }
    details.os = std::env::consts::OS.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPane;

    #[tokio::test]
    async fn reuses_first_non_chat_pane() {
        let pane = RecordingPane::new();
        pane.set_panes(vec![
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
        pane.push_capture("[me@box ~][0]»");

        let exec = init_exec_pane(&pane, "%0", 100).await.unwrap();
        assert_eq!(exec.id, "%1");
        assert_eq!(exec.shell, "bash");
        assert!(exec.is_prepared);
        assert!(pane.created().is_empty());
    }

    #[tokio::test]
    async fn creates_pane_when_chat_is_alone() {
        let pane = RecordingPane::new();
        pane.set_panes(vec![PaneDetails {
            id: "%0".into(),
            current_command: "zsh".into(),
            ..Default::default()
        }]);

        let exec = init_exec_pane(&pane, "%0", 100).await.unwrap();
        assert_eq!(exec.id, "%9");
        assert_eq!(pane.created().len(), 1);
        assert!(!exec.is_prepared);
    }
}
