//! Telling a bare Escape apart from the start of a key sequence.
//!
//! Arrow and editing keys arrive as multi-byte sequences that begin with
//! `ESC` (`ESC [ D` for Left, `ESC [ 3 ~` for Delete, `ESC O H` for Home).
//! A lone `ESC` means the user wants out. The only way to tell the two
//! apart is timing: bytes of a sequence arrive together, so if nothing
//! follows `ESC` within [`ESCAPE_TIMEOUT`] it was a standalone keypress.

use std::io;
use std::time::Duration;

/// How long to wait for each byte after `ESC`.
pub const ESCAPE_TIMEOUT: Duration = Duration::from_millis(25);

pub const ESC: u8 = 0x1b;

/// Byte-at-a-time input.
pub trait ByteSource {
    /// Block for the next byte. `None` is end of input.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Wait at most `timeout` for the next byte. `None` is a timeout or
    /// end of input.
    fn read_byte_timeout(&mut self, timeout: Duration) -> io::Result<Option<u8>>;
}

/// Keys recognized after `ESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeKey {
    /// `ESC` on its own.
    Cancel,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    Delete,
    Unknown,
}

/// Read the rest of a sequence whose `ESC` has already been consumed.
/// The returned bytes start with `ESC`.
pub fn read_escape_sequence(src: &mut dyn ByteSource) -> io::Result<Vec<u8>> {
    let mut seq = vec![ESC];
    while let Some(b) = src.read_byte_timeout(ESCAPE_TIMEOUT)? {
        seq.push(b);
        if seq.len() == 2 {
            if b != b'[' && b != b'O' {
                break;
            }
            continue;
        }
        let csi = seq.get(1) == Some(&b'[');
        // CSI ends on a final byte in 0x40..=0x7E; SS3 is always 3 bytes.
        if !csi || (0x40..=0x7e).contains(&b) {
            break;
        }
    }
    Ok(seq)
}

/// Map a sequence from [`read_escape_sequence`] to a key.
pub fn classify(seq: &[u8]) -> EscapeKey {
    match seq {
        [ESC] => EscapeKey::Cancel,
        [ESC, b'[', rest @ ..] => match rest {
            b"D" => EscapeKey::Left,
            b"C" => EscapeKey::Right,
            b"A" => EscapeKey::Up,
            b"B" => EscapeKey::Down,
            b"H" => EscapeKey::Home,
            b"F" => EscapeKey::End,
            b"3~" => EscapeKey::Delete,
            _ => EscapeKey::Unknown,
        },
        [ESC, b'O', b'H'] => EscapeKey::Home,
        [ESC, b'O', b'F'] => EscapeKey::End,
        _ => EscapeKey::Unknown,
    }
}
