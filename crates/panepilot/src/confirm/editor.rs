//! Editing a proposed command in the user's editor.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

/// Editors searched for on `PATH` when neither `$EDITOR` nor `$VISUAL` is set.
pub const FALLBACK_EDITORS: &[&str] = &["vim", "vi", "nano", "emacs"];

/// Pick an editor: `$EDITOR`, then `$VISUAL`, then the first fallback found
/// on `path`.
pub fn resolve_editor(
    lookup: impl Fn(&str) -> Option<String>,
    path: Option<&std::ffi::OsStr>,
) -> Option<String> {
    for var in ["EDITOR", "VISUAL"] {
        if let Some(editor) = lookup(var).filter(|e| !e.trim().is_empty()) {
            return Some(editor);
        }
    }
    let dirs: Vec<PathBuf> = path.map(|p| std::env::split_paths(p).collect())?;
    FALLBACK_EDITORS
        .iter()
        .find(|name| dirs.iter().any(|dir| is_executable(&dir.join(name))))
        .map(|name| name.to_string())
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Open `command` in the editor and return the trimmed result.
///
/// Blocks until the editor exits; call from a blocking context.
pub fn edit_command(command: &str) -> Result<String, String> {
    let editor = resolve_editor(|k| std::env::var(k).ok(), std::env::var_os("PATH").as_deref())
        .ok_or("No editor found. Please set the EDITOR environment variable.")?;

    let mut file = tempfile::Builder::new()
        .prefix("panepilot-edit-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| format!("Failed to create temporary file: {e}"))?;
    file.write_all(command.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| format!("Failed to write temporary file: {e}"))?;

    // `$EDITOR` may carry arguments, e.g. `code --wait`.
    let mut parts = editor.split_whitespace();
    let program = parts.next().ok_or("EDITOR is empty")?;
    debug!(editor = %editor, path = %file.path().display(), "Opening editor");
    let status = Command::new(program)
        .args(parts)
        .arg(file.path())
        .status()
        .map_err(|e| format!("Failed to run editor '{editor}': {e}"))?;
    if !status.success() {
        return Err(format!("Editor exited with {status}"));
    }

    let edited = std::fs::read_to_string(file.path())
        .map_err(|e| format!("Failed to read edited command: {e}"))?;
    Ok(edited.trim().to_string())
}
