//! Raw terminal input on the controlling TTY.

use std::io::{self, IsTerminal};
use std::os::fd::AsRawFd;
use std::time::Duration;

use libc::c_int;

use crate::confirm::escape::ByteSource;

/// Enables raw mode for its lifetime.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!("Failed to restore terminal mode: {e}");
        }
    }
}

/// Whether stdin and stdout are both terminals.
pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

fn poll_readable(fd: c_int, timeout_ms: i32) -> bool {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `fds` is a valid, exclusively borrowed pollfd and the count
    // passed is 1, so poll reads and writes only that struct.
    let result = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    result > 0 && (fds.revents & libc::POLLIN) != 0
}

/// Unbuffered byte reader on stdin.
///
/// Reads go straight to the descriptor so `poll` sees exactly the bytes
/// that have not been consumed yet.
pub struct StdinBytes {
    fd: c_int,
}

impl StdinBytes {
    pub fn new() -> Self {
        Self::from_fd(&io::stdin())
    }

    /// Read from another descriptor. The caller keeps it open while this
    /// reader is used.
    pub fn from_fd(source: &impl AsRawFd) -> Self {
        Self {
            fd: source.as_raw_fd(),
        }
    }

    /// Whether a byte is ready within `timeout`.
    pub fn ready(&self, timeout: Duration) -> bool {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        poll_readable(self.fd, ms)
    }

    fn read_raw(&mut self) -> io::Result<Option<u8>> {
        let mut byte = 0u8;
        loop {
            // SAFETY: the buffer is the one-byte local `byte`, and at most
            // 1 byte is requested.
            let n = unsafe { libc::read(self.fd, (&mut byte as *mut u8).cast(), 1) };
            match n {
                1 => return Ok(Some(byte)),
                0 => return Ok(None),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }
}

impl Default for StdinBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSource for StdinBytes {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.read_raw()
    }

    fn read_byte_timeout(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if !self.ready(timeout) {
            return Ok(None);
        }
        self.read_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::escape::{ESC, ESCAPE_TIMEOUT, EscapeKey, classify, read_escape_sequence};
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn lone_escape_times_out_to_cancel() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut input = StdinBytes::from_fd(&rx);

        tx.write_all(&[ESC]).unwrap();
        assert_eq!(input.read_byte().unwrap(), Some(ESC));
        let start = Instant::now();
        let seq = read_escape_sequence(&mut input).unwrap();
        let waited = start.elapsed();

        assert_eq!(classify(&seq), EscapeKey::Cancel);
        assert!(waited >= ESCAPE_TIMEOUT - Duration::from_millis(5), "{waited:?}");
        assert!(waited < Duration::from_millis(500), "{waited:?}");
    }

    #[test]
    fn arrow_sequence_arriving_together_decodes() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut input = StdinBytes::from_fd(&rx);

        tx.write_all(&[ESC, b'[', b'D']).unwrap();
        assert_eq!(input.read_byte().unwrap(), Some(ESC));
        let seq = read_escape_sequence(&mut input).unwrap();

        assert_eq!(seq, vec![ESC, b'[', b'D']);
        assert_eq!(classify(&seq), EscapeKey::Left);
        assert!(!input.ready(Duration::ZERO));
    }

    #[test]
    fn closed_writer_reads_as_end_of_input() {
        let (tx, rx) = UnixStream::pair().unwrap();
        let mut input = StdinBytes::from_fd(&rx);
        drop(tx);
        assert_eq!(input.read_byte_timeout(ESCAPE_TIMEOUT).unwrap(), None);
        assert_eq!(input.read_byte().unwrap(), None);
    }
}
