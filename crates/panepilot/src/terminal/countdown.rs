//! The in-place countdown shown while waiting on a busy pane.
//!
//! On a terminal the countdown runs in raw mode on a blocking thread. Any
//! key toggles pause. Ctrl+C cancels the surrounding scope, because raw
//! mode turns it into a plain byte instead of a signal. Off a terminal it
//! is a plain sleep.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::raw::{RawModeGuard, StdinBytes, is_interactive};
use crate::agent::countdown::{Countdown, SleepCountdown};
use crate::confirm::escape::ByteSource;

const TICK: Duration = Duration::from_millis(100);
const CTRL_C: u8 = 3;

/// Countdown rendered on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalCountdown;

impl Countdown for TerminalCountdown {
    fn wait<'a>(&'a self, seconds: u64, cancel: &'a CancellationToken) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !is_interactive() {
                SleepCountdown.wait(seconds, cancel).await;
                return;
            }
            let token = cancel.clone();
            let joined =
                tokio::task::spawn_blocking(move || run_countdown(seconds, &token)).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Countdown failed, falling back to sleep: {e}");
                    SleepCountdown.wait(seconds, cancel).await;
                }
                Err(e) => warn!("Countdown task failed: {e}"),
            }
        })
    }
}

fn render(out: &mut impl Write, remaining: Duration, paused: bool) -> io::Result<()> {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    let suffix = if paused { " (paused, press any key)" } else { "" };
    write!(out, "\rWaiting… {secs}s{suffix}\x1b[K")?;
    out.flush()
}

fn run_countdown(seconds: u64, cancel: &CancellationToken) -> io::Result<()> {
    let _raw = RawModeGuard::enable()?;
    let mut input = StdinBytes::new();
    let mut out = io::stdout();
    let mut remaining = Duration::from_secs(seconds);
    let mut paused = false;
    let mut last = Instant::now();

    render(&mut out, remaining, paused)?;
    while !remaining.is_zero() && !cancel.is_cancelled() {
        if input.ready(TICK) {
            match input.read_byte()? {
                Some(CTRL_C) => {
                    cancel.cancel();
                    break;
                }
                Some(_) => paused = !paused,
                None => break,
            }
        }
        let now = Instant::now();
        if !paused {
            remaining = remaining.saturating_sub(now - last);
        }
        last = now;
        render(&mut out, remaining, paused)?;
    }
    write!(out, "\r\x1b[K")?;
    out.flush()
}
