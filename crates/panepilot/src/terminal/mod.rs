//! Terminal plumbing shared by the confirmation prompt and the countdown.
//!
//! - [`raw`]: raw mode and unbuffered, pollable stdin.
//! - [`countdown`]: the in-place `Waiting… Ns` countdown.

pub mod countdown;
pub mod raw;

pub use countdown::TerminalCountdown;
pub use raw::{RawModeGuard, StdinBytes, is_interactive};
