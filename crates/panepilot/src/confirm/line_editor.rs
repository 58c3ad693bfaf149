//! A single-line editor for raw-mode terminals.
//!
//! Only what a yes/no/edit prompt needs: insertion at the cursor,
//! Backspace, Delete, Left/Right, Home/End, and Enter, Ctrl+C, Ctrl+D, or
//! Escape to finish. After each edit the whole line is redrawn:
//!
//! ```text
//! \r PROMPT BUFFER ESC[K \r PROMPT BUFFER[..cursor]
//! ```
//!
//! The first half repaints and clears stale characters to the right. The
//! second half leaves the terminal cursor at the editing position.
//! Impossible edits ring the bell (`\x07`).

use std::io::{self, Write};

use super::escape::{ByteSource, ESC, EscapeKey, classify, read_escape_sequence};

/// Longest accepted input, in characters.
pub const MAX_INPUT_CHARS: usize = 4096;

const BELL: &[u8] = b"\x07";

/// What an edit did to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Redraw,
    Beep,
}

/// How reading a line ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Submitted(String),
    Cancelled,
}

/// Characters plus a cursor index into them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBuffer {
    chars: Vec<char>,
    cursor: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Text left of the cursor.
    pub fn before_cursor(&self) -> String {
        self.chars.iter().take(self.cursor).collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn insert(&mut self, c: char) -> Edit {
        if self.chars.len() >= MAX_INPUT_CHARS {
            return Edit::Beep;
        }
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
        Edit::Redraw
    }

    pub fn backspace(&mut self) -> Edit {
        if self.cursor == 0 {
            return Edit::Beep;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        Edit::Redraw
    }

    pub fn delete_forward(&mut self) -> Edit {
        if self.cursor >= self.chars.len() {
            return Edit::Beep;
        }
        self.chars.remove(self.cursor);
        Edit::Redraw
    }

    pub fn left(&mut self) -> Edit {
        if self.cursor == 0 {
            return Edit::Beep;
        }
        self.cursor -= 1;
        Edit::Redraw
    }

    pub fn right(&mut self) -> Edit {
        if self.cursor >= self.chars.len() {
            return Edit::Beep;
        }
        self.cursor += 1;
        Edit::Redraw
    }

    pub fn home(&mut self) -> Edit {
        if self.cursor == 0 {
            return Edit::Beep;
        }
        self.cursor = 0;
        Edit::Redraw
    }

    pub fn end(&mut self) -> Edit {
        if self.cursor == self.chars.len() {
            return Edit::Beep;
        }
        self.cursor = self.chars.len();
        Edit::Redraw
    }

    /// Apply a decoded escape key. `None` means the key ends input.
    pub fn apply_escape(&mut self, key: EscapeKey) -> Option<Edit> {
        match key {
            EscapeKey::Cancel => None,
            EscapeKey::Left => Some(self.left()),
            EscapeKey::Right => Some(self.right()),
            EscapeKey::Home => Some(self.home()),
            EscapeKey::End => Some(self.end()),
            EscapeKey::Delete => Some(self.delete_forward()),
            EscapeKey::Up | EscapeKey::Down | EscapeKey::Unknown => Some(Edit::Beep),
        }
    }
}

fn redraw(out: &mut dyn Write, prompt: &str, buf: &LineBuffer) -> io::Result<()> {
    write!(
        out,
        "\r{prompt}{}\x1b[K\r{prompt}{}",
        buf.text(),
        buf.before_cursor()
    )?;
    out.flush()
}

fn render(out: &mut dyn Write, prompt: &str, buf: &LineBuffer, edit: Edit) -> io::Result<()> {
    match edit {
        Edit::Redraw => redraw(out, prompt, buf),
        Edit::Beep => {
            out.write_all(BELL)?;
            out.flush()
        }
    }
}

/// Number of bytes in a UTF-8 sequence starting with `lead`.
fn utf8_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 0,
    }
}

/// Read the continuation bytes of a multi-byte character.
fn read_utf8_char(src: &mut dyn ByteSource, lead: u8) -> io::Result<Option<char>> {
    let len = utf8_len(lead);
    if len == 0 {
        return Ok(None);
    }
    let mut bytes = vec![lead];
    for _ in 1..len {
        match src.read_byte()? {
            Some(b) => bytes.push(b),
            None => return Ok(None),
        }
    }
    Ok(std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.chars().next()))
}

/// Print `prompt` and edit a line until submit or cancel.
///
/// End of input submits whatever was typed.
pub fn read_line(
    src: &mut dyn ByteSource,
    out: &mut dyn Write,
    prompt: &str,
) -> io::Result<LineOutcome> {
    let mut buf = LineBuffer::new();
    write!(out, "{prompt}")?;
    out.flush()?;

    loop {
        let Some(byte) = src.read_byte()? else {
            write!(out, "\r\n")?;
            return Ok(LineOutcome::Submitted(buf.text()));
        };

        let edit = match byte {
            b'\r' | b'\n' => {
                write!(out, "\r\n")?;
                return Ok(LineOutcome::Submitted(buf.text()));
            }
            // Ctrl+C
            3 => {
                write!(out, "\r\n")?;
                return Ok(LineOutcome::Cancelled);
            }
            // Ctrl+D
            4 => {
                if buf.is_empty() {
                    write!(out, "\r\n")?;
                    return Ok(LineOutcome::Cancelled);
                }
                Edit::Beep
            }
            127 | 8 => buf.backspace(),
            ESC => {
                let seq = read_escape_sequence(src)?;
                match buf.apply_escape(classify(&seq)) {
                    Some(edit) => edit,
                    None => {
                        write!(out, "\r\n")?;
                        return Ok(LineOutcome::Cancelled);
                    }
                }
            }
            0x20..=0x7e => buf.insert(char::from(byte)),
            0x80..=0xff => match read_utf8_char(src, byte)? {
                Some(c) => buf.insert(c),
                None => Edit::Beep,
            },
            _ => Edit::Beep,
        };
        render(out, prompt, &buf, edit)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::escape::tests::{ScriptedInput, Step};

    fn run(input: &mut ScriptedInput) -> (LineOutcome, String) {
        let mut out = Vec::new();
        let outcome = read_line(input, &mut out, "> ").unwrap();
        (outcome, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn typing_and_enter_submits() {
        let (outcome, out) = run(&mut ScriptedInput::bytes(b"yes\r"));
        assert_eq!(outcome, LineOutcome::Submitted("yes".into()));
        assert!(out.starts_with("> "));
        assert!(out.ends_with("\r\n"));
    }

    #[test]
    fn cursor_movement_inserts_mid_line() {
        // "ac", Left, "b" -> "abc"
        let (outcome, _) = run(&mut ScriptedInput::bytes(b"ac\x1b[Db\r"));
        assert_eq!(outcome, LineOutcome::Submitted("abc".into()));
    }

    #[test]
    fn home_then_delete_removes_first_char() {
        let (outcome, _) = run(&mut ScriptedInput::bytes(b"xyes\x1b[H\x1b[3~\r"));
        assert_eq!(outcome, LineOutcome::Submitted("yes".into()));
    }

    #[test]
    fn backspace_at_start_beeps() {
        let (outcome, out) = run(&mut ScriptedInput::bytes(b"\x7fn\r"));
        assert_eq!(outcome, LineOutcome::Submitted("n".into()));
        assert!(out.contains('\x07'));
    }

    #[test]
    fn lone_escape_cancels() {
        let mut input = ScriptedInput::new([
            Step::Byte(b'y'),
            Step::Byte(ESC),
            Step::Pause,
            Step::Byte(b'\r'),
        ]);
        let (outcome, _) = run(&mut input);
        assert_eq!(outcome, LineOutcome::Cancelled);
    }

    #[test]
    fn ctrl_c_cancels_and_ctrl_d_only_when_empty() {
        let (outcome, _) = run(&mut ScriptedInput::bytes(b"abc\x03"));
        assert_eq!(outcome, LineOutcome::Cancelled);

        let (outcome, _) = run(&mut ScriptedInput::bytes(b"\x04"));
        assert_eq!(outcome, LineOutcome::Cancelled);

        let (outcome, out) = run(&mut ScriptedInput::bytes(b"a\x04\r"));
        assert_eq!(outcome, LineOutcome::Submitted("a".into()));
        assert!(out.contains('\x07'));
    }

    #[test]
    fn eof_submits_buffer() {
        let (outcome, _) = run(&mut ScriptedInput::bytes(b"edit"));
        assert_eq!(outcome, LineOutcome::Submitted("edit".into()));
    }

    #[test]
    fn multibyte_characters_are_single_cursor_steps() {
        // "é" then Left then "x" -> "xé"
        let mut bytes = "é".as_bytes().to_vec();
        bytes.extend_from_slice(b"\x1b[Dx\r");
        let (outcome, _) = run(&mut ScriptedInput::bytes(&bytes));
        assert_eq!(outcome, LineOutcome::Submitted("xé".into()));
    }

    #[test]
    fn redraw_clears_to_end_of_line() {
        let mut buf = LineBuffer::new();
        buf.insert('a');
        buf.insert('b');
        buf.left();
        let mut out = Vec::new();
        redraw(&mut out, "> ", &buf).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\r> ab\x1b[K\r> a");
    }

    #[test]
    fn input_is_capped() {
        let mut buf = LineBuffer::new();
        for _ in 0..MAX_INPUT_CHARS {
            assert_eq!(buf.insert('x'), Edit::Redraw);
        }
        assert_eq!(buf.insert('x'), Edit::Beep);
        assert_eq!(buf.end(), Edit::Beep);
        assert_eq!(buf.apply_escape(EscapeKey::Up), Some(Edit::Beep));
        assert_eq!(buf.apply_escape(EscapeKey::Cancel), None);
    }
}
