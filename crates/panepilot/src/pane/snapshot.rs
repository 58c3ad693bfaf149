//! Rendering the current window for the model.
//!
//! Every pane except the chat pane is captured and wrapped in a
//! `<tmux_pane>` element. The exec pane is marked `type="exec"`; the rest
//! are `read-only`.

use super::{Pane, PaneDetails};

/// Capture all non-chat panes of the current window and render them.
///
/// The exec pane's preparation and shell details come from `exec_pane`,
/// since those are tracked by the session rather than tmux.
pub async fn capture_window(
    pane: &dyn Pane,
    chat_pane_id: &str,
    exec_pane: &PaneDetails,
    max_lines: usize,
) -> Result<String, String> {
    let target = pane.current_window_target().await?;
    let mut panes = Vec::new();
    for mut details in pane.list_panes(&target).await? {
        if details.id == chat_pane_id {
            continue;
        }
        details.content = pane.capture(&details.id, max_lines).await?;
        if details.id == exec_pane.id {
            details.is_prepared = exec_pane.is_prepared;
            details.shell = exec_pane.shell.clone();
        }
        panes.push(details);
    }
    Ok(render_window(&panes, &exec_pane.id))
}

/// Render panes as the `<current_tmux_window_state>` document.
pub fn render_window(panes: &[PaneDetails], exec_pane_id: &str) -> String {
    let mut out = String::from("<current_tmux_window_state>\n");
    for p in panes {
        let kind = if p.id == exec_pane_id {
            "exec"
        } else {
            "read-only"
        };
        out.push_str(&format!(
            "<tmux_pane id=\"{}\" command=\"{}\" active=\"{}\" type=\"{kind}\" prepared=\"{}\" shell=\"{}\" subshell=\"{}\">\n",
            escape_attr(&p.id),
            escape_attr(&p.current_command),
            p.is_active,
            p.is_prepared,
            escape_attr(&p.shell),
            p.is_sub_shell,
        ));
        out.push_str(p.content.trim_end());
        out.push_str("\n</tmux_pane>\n");
    }
    out.push_str("</current_tmux_window_state>");
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
