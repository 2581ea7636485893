use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine::Stage;

/// Classification of a collaborator failure.
///
/// The set is closed: every raw provider error maps to exactly one kind via
/// [`classify_error`]. Only the retryable kinds are attempted again, at either
/// retry tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RateLimited,
    Unauthorized,
    ServerError,
    Timeout,
    ConnectionError,
    Unknown,
}

impl ErrorKind {
    /// Whether an item that failed with this kind may be attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::Timeout
                | ErrorKind::ConnectionError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Maps raw provider error text to an [`ErrorKind`].
///
/// Matching is case-insensitive and checked in priority order, so a message
/// mentioning both a 503 and a timeout is a `ServerError`.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["429", "too_many", "too many requests", "rate limit", "rate_limit", "ratelimit", "rate-limit"]) {
        ErrorKind::RateLimited
    } else if has(&["401", "403", "unauthorized", "forbidden", "authentication", "invalid api key"]) {
        ErrorKind::Unauthorized
    } else if has(&["500", "502", "503", "504", "server error", "internal server", "bad gateway", "service unavailable"]) {
        ErrorKind::ServerError
    } else if has(&["timeout", "timed out", "deadline exceeded"]) {
        ErrorKind::Timeout
    } else if has(&["connection", "network", "dns", "broken pipe", "reset by peer"]) {
        ErrorKind::ConnectionError
    } else {
        ErrorKind::Unknown
    }
}

/// Outcome of a single failed attempt on one work item.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Recorded for items skipped after the job's cancellation token fired.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Unknown, "cancelled before the item could be attempted")
    }
}

/// Raw failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl ProviderError {
    pub fn message(text: impl Into<String>) -> Self {
        ProviderError::Message(text.into())
    }

    /// Status codes and transport flags first, message text otherwise.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Status { status: 429, .. } => ErrorKind::RateLimited,
            ProviderError::Status { status: 401 | 403, .. } => ErrorKind::Unauthorized,
            ProviderError::Status { status: 408, .. } => ErrorKind::Timeout,
            ProviderError::Status { status, .. } if *status >= 500 => ErrorKind::ServerError,
            ProviderError::Status { status: 400..=499, body } => client_error_kind(body),
            ProviderError::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
            ProviderError::Transport(e) if e.is_connect() => ErrorKind::ConnectionError,
            other => classify_error(&other.to_string()),
        }
    }

    pub fn into_item_failure(self) -> ItemFailure {
        ItemFailure::new(self.kind(), self.to_string())
    }
}

/// A 4xx body only decides between rate limiting and auth. Anything else is a
/// permanent client error, even if the body happens to mention a 5xx code.
fn client_error_kind(body: &str) -> ErrorKind {
    match classify_error(body) {
        kind @ (ErrorKind::RateLimited | ErrorKind::Unauthorized) => kind,
        _ => ErrorKind::Unknown,
    }
}

/// Stage-fatal conditions that move a job to `Failed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("text segmentation failed: {0}")]
    SegmentationFailure(String),

    #[error("all {failed} items failed during {stage}: {summary}")]
    AllItemsFailed {
        stage: Stage,
        failed: usize,
        summary: String,
    },

    #[error("{failed} of {total} items failed during {stage}: {summary}")]
    PartialFailureRejected {
        stage: Stage,
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("concatenation failed: {0}")]
    ConcatenationFailure(String),

    #[error("job cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limits() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(classify_error("too_many_concurrent_requests"), ErrorKind::RateLimited);
        assert_eq!(classify_error("Rate limit exceeded"), ErrorKind::RateLimited);
    }

    #[test]
    fn generate_is_not_a_rate_limit() {
        assert_eq!(classify_error("failed to generate audio"), ErrorKind::Unknown);
    }

    #[test]
    fn classifies_auth_failures() {
        assert_eq!(classify_error("status 401: invalid key"), ErrorKind::Unauthorized);
        assert_eq!(classify_error("Authentication failed"), ErrorKind::Unauthorized);
        assert_eq!(classify_error("403 Forbidden"), ErrorKind::Unauthorized);
    }

    #[test]
    fn classifies_server_errors() {
        assert_eq!(classify_error("502 Bad Gateway"), ErrorKind::ServerError);
        assert_eq!(classify_error("Internal Server Error"), ErrorKind::ServerError);
        assert_eq!(classify_error("504 gateway timeout"), ErrorKind::ServerError);
    }

    #[test]
    fn classifies_timeouts_and_connection_errors() {
        assert_eq!(classify_error("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_error("operation timeout after 60s"), ErrorKind::Timeout);
        assert_eq!(classify_error("connection refused"), ErrorKind::ConnectionError);
        assert_eq!(classify_error("network unreachable"), ErrorKind::ConnectionError);
    }

    #[test]
    fn unmatched_text_is_unknown() {
        assert_eq!(classify_error("voice not found"), ErrorKind::Unknown);
        assert_eq!(classify_error(""), ErrorKind::Unknown);
    }

    #[test]
    fn retryable_set() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::ConnectionError.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn item_failure_display() {
        let failure = ItemFailure::new(classify_error("503 service unavailable"), "503 service unavailable");
        assert_eq!(failure.kind, ErrorKind::ServerError);
        assert_eq!(failure.to_string(), "ServerError: 503 service unavailable");
    }

    #[test]
    fn cancelled_items_are_terminal() {
        assert!(!ItemFailure::cancelled().kind.is_retryable());
    }

    #[test]
    fn provider_status_codes_take_precedence() {
        let status = |status: u16, body: &str| ProviderError::Status {
            status,
            body: body.into(),
        };
        assert_eq!(status(429, "slow down").kind(), ErrorKind::RateLimited);
        assert_eq!(status(401, "bad key").kind(), ErrorKind::Unauthorized);
        assert_eq!(status(503, "").kind(), ErrorKind::ServerError);
        assert_eq!(status(408, "").kind(), ErrorKind::Timeout);
        assert_eq!(status(422, "voice_not_found").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn client_errors_never_become_server_errors() {
        let status = |status: u16, body: &str| ProviderError::Status {
            status,
            body: body.into(),
        };
        let too_long = status(400, "text exceeds the 5000 character limit");
        assert_eq!(too_long.kind(), ErrorKind::Unknown);
        assert!(!too_long.kind().is_retryable());
        assert_eq!(status(404, "upstream returned 502 bad gateway").kind(), ErrorKind::Unknown);
        assert_eq!(status(400, "request timed out").kind(), ErrorKind::Unknown);
        assert_eq!(status(400, "rate_limit_exceeded").kind(), ErrorKind::RateLimited);
        assert_eq!(status(400, "invalid api key").kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn provider_messages_fall_back_to_text_matching() {
        let failure = ProviderError::message("upstream connection reset by peer").into_item_failure();
        assert_eq!(failure.kind, ErrorKind::ConnectionError);
        assert_eq!(failure.message, "upstream connection reset by peer");
    }

    #[test]
    fn job_error_display() {
        let err = JobError::AllItemsFailed {
            stage: Stage::GeneratingAudio,
            failed: 3,
            summary: "Unauthorized: 3".into(),
        };
        assert_eq!(
            err.to_string(),
            "all 3 items failed during GENERATING_AUDIO: Unauthorized: 3"
        );
    }
}
