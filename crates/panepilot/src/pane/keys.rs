//! Turning model-provided text into `tmux send-keys` invocations.
//!
//! Each input line becomes one invocation. Plain lines are sent literally
//! (`-l`). A trailing `;` is escaped because tmux would otherwise read it
//! as a command separator. Lines that mention a modifier (`C-x`, `M-x`)
//! or a named key (`Enter`, `Up`, `F5`, ...) are split on spaces: key names
//! become their own arguments and the words between them are joined back
//! into text runs.

/// Named keys tmux understands (F1-F12 are matched separately).
pub const SPECIAL_KEYS: &[&str] = &[
    "Up", "Down", "Left", "Right", "BSpace", "BTab", "DC", "End", "Enter", "Escape", "Home", "IC",
    "NPage", "PageDown", "PgDn", "PPage", "PageUp", "PgUp", "Space", "Tab",
];

/// One `send-keys` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendChunk {
    /// `send-keys -l <text>`.
    Literal(String),
    /// `send-keys <arg> <arg> ...` with key names and text runs.
    Keys(Vec<String>),
    /// `send-keys Enter`.
    Enter,
}

/// Whether `token` is a key name or a modifier chord.
pub fn is_special_key(token: &str) -> bool {
    if token.starts_with("C-") || token.starts_with("M-") {
        return true;
    }
    if SPECIAL_KEYS.contains(&token) {
        return true;
    }
    token
        .strip_prefix('F')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=12).contains(&n))
}

/// Escape a trailing `;` so tmux does not treat it as a separator.
pub fn escape_trailing_semicolon(line: &str) -> String {
    match line.strip_suffix(';') {
        Some(head) => format!("{head}\\;"),
        None => line.to_string(),
    }
}

/// Split a line that contains key names into send-keys arguments.
pub fn tokenize_keys(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut text = String::new();

    for part in line.split(' ') {
        if part.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            continue;
        }
        if is_special_key(part) {
            if !text.is_empty() {
                args.push(escape_trailing_semicolon(&std::mem::take(&mut text)));
            }
            args.push(part.to_string());
        } else {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(part);
        }
    }
    if !text.is_empty() {
        args.push(escape_trailing_semicolon(&text));
    }
    args
}

/// Plan the `send-keys` invocations for `text`. With `auto_enter`, Enter
/// follows every line except a trailing empty one.
pub fn plan_send(text: &str, auto_enter: bool) -> Vec<SendChunk> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    let mut chunks = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() {
            if line.split(' ').any(is_special_key) {
                chunks.push(SendChunk::Keys(tokenize_keys(line)));
            } else {
                chunks.push(SendChunk::Literal(escape_trailing_semicolon(line)));
            }
        }
        if auto_enter && (i < last || !line.is_empty()) {
            chunks.push(SendChunk::Enter);
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_key_names() {
        for key in ["Enter", "C-c", "M-x", "F1", "F12", "PgDn", "BTab"] {
            assert!(is_special_key(key), "{key}");
        }
        for text in ["F13", "F0", "enter", "Endpoint", "ls"] {
            assert!(!is_special_key(text), "{text}");
        }
    }

    #[test]
    fn plain_line_is_literal_with_enter() {
        assert_eq!(
            plan_send("ls -la", true),
            vec![SendChunk::Literal("ls -la".into()), SendChunk::Enter]
        );
        assert_eq!(
            plan_send("ls -la", false),
            vec![SendChunk::Literal("ls -la".into())]
        );
    }

    #[test]
    fn trailing_semicolon_is_escaped() {
        assert_eq!(
            plan_send("echo a; echo b;", false),
            vec![SendChunk::Literal("echo a; echo b\\;".into())]
        );
    }

    #[test]
    fn key_names_become_separate_arguments() {
        assert_eq!(
            tokenize_keys("C-a d"),
            vec!["C-a".to_string(), "d".to_string()]
        );
        assert_eq!(
            tokenize_keys(":wq Enter"),
            vec![":wq".to_string(), "Enter".to_string()]
        );
        assert_eq!(
            tokenize_keys("echo hi  there Escape"),
            vec!["echo hi  there".to_string(), "Escape".to_string()]
        );
    }

    #[test]
    fn multiline_sends_enter_between_lines_but_not_after_trailing_newline() {
        let chunks = plan_send("line one\nline two\n", true);
        assert_eq!(
            chunks,
            vec![
                SendChunk::Literal("line one".into()),
                SendChunk::Enter,
                SendChunk::Literal("line two".into()),
                SendChunk::Enter,
            ]
        );
    }

    #[test]
    fn blank_inner_line_still_gets_enter() {
        let chunks = plan_send("a\n\nb", true);
        assert_eq!(chunks.iter().filter(|c| **c == SendChunk::Enter).count(), 3);
    }

    #[test]
    fn single_key_token() {
        assert_eq!(
            plan_send("Enter", false),
            vec![SendChunk::Keys(vec!["Enter".into()])]
        );
    }
}
