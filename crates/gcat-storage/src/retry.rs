//! Retry schedule and response classification for portal requests.

use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Credentials or token refused; later calls cannot succeed either.
    Rejected,
    /// Throttling or a server-side fault.
    Transient,
    Fatal,
}

pub fn classify_response(status: StatusCode) -> ResponseClass {
    if status.is_success() {
        ResponseClass::Success
    } else if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || matches!(status.as_u16(), 498 | 499)
    {
        ResponseClass::Rejected
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ResponseClass::Transient
    } else {
        ResponseClass::Fatal
    }
}

/// Timeouts and connection failures are worth another attempt.
pub fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Exponential backoff capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Pause before retry `attempt` (0-based), `None` once retries run out.
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|a| 1u32.checked_shl(a))
            .unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}
