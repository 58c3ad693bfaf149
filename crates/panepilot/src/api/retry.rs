//! Typed chat request failures and the policy for retrying them.
//!
//! [`OpenAiCompatClient::chat`](crate::OpenAiCompatClient::chat) reports an
//! [`ApiError`] rather than a string, so retry decisions look at the HTTP
//! status and the server's `Retry-After` hint instead of matching text.
//! A cancelled request is never retried: the caller races the whole retry
//! loop against its cancellation token.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Why one chat request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No HTTP response arrived (connect error, reset, timeout).
    Transport(String),
    /// The endpoint answered with a non-success status.
    Http {
        provider: &'static str,
        status: u16,
        /// Parsed `Retry-After` header, if the server sent one.
        retry_after: Option<Duration>,
        body: String,
    },
    /// A success status whose body was unusable, or an error object in it.
    Response(String),
}

impl ApiError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Http { status, .. } => matches!(status, 408 | 409 | 429 | 500..=599),
            ApiError::Response(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "request failed: {e}"),
            ApiError::Http {
                provider,
                status,
                body,
                ..
            } => write!(f, "{provider} API HTTP {status}: {body}"),
            ApiError::Response(e) => f.write_str(e),
        }
    }
}

impl std::error::Error for ApiError {}

/// Parse a `Retry-After` value: delta seconds or an HTTP date. Dates in the
/// past yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}

/// How many times, and how long between, failed requests are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail on the first error).
    pub max_retries: u32,
    /// Wait before the first retry; doubles with each further one.
    pub base_delay: Duration,
    /// Upper bound on a computed backoff.
    pub max_delay: Duration,
    /// Upper bound on a server-requested `Retry-After` wait. Longer hints
    /// fail the request instead of stalling the prompt.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// How long to wait before retry number `attempt` (0-indexed) after
    /// `error`, or `None` when the request should fail now.
    pub fn next_delay(&self, attempt: u32, error: &ApiError) -> Option<Duration> {
        if attempt >= self.max_retries || !error.is_retryable() {
            return None;
        }
        if let Some(hint) = error.retry_after() {
            return (hint <= self.max_retry_after).then_some(hint);
        }
        let backoff = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        Some(backoff.min(self.max_delay))
    }
}
