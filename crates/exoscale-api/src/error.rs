//! Error taxonomy for the Exoscale API façade.
//!
//! Every failure leaving the façade is an [`ApiError`]. HTTP status codes and
//! the cloud's `{message, reason}` error envelope are mapped here so that the
//! rest of the workspace only ever matches on [`ErrorKind`].

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for façade calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error kinds shared by the façade and the autoscaler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Auth,
    NotFound,
    Busy,
    Conflict,
    Quota,
    OutOfRange,
    Timeout,
    Canceled,
    Internal,
    Format,
    Unavailable,
    Config,
}

impl ErrorKind {
    /// Whether the autoscaler may retry the same call on a later loop.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport
                | ErrorKind::Busy
                | ErrorKind::Timeout
                | ErrorKind::Internal
                | ErrorKind::Unavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Busy => "busy",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Quota => "quota",
            ErrorKind::OutOfRange => "out-of-range",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Internal => "internal",
            ErrorKind::Format => "format",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`CloudApi`](crate::CloudApi) calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource busy: {0}")]
    Busy(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded for {resource}: {message}")]
    Quota { resource: String, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled")]
    Canceled,

    #[error("internal cloud error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::Protocol(_) => ErrorKind::Protocol,
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Busy(_) => ErrorKind::Busy,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::Quota { .. } => ErrorKind::Quota,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::Canceled => ErrorKind::Canceled,
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Errors an operation waiter may absorb into its failure budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Internal(_))
    }

    /// Map a non-2xx response into a typed error.
    ///
    /// The body is decoded as the `{message, reason}` envelope when possible;
    /// otherwise the status code alone decides the kind.
    pub fn from_response(status: http::StatusCode, body: &[u8]) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
        let message = envelope
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {status}"));
        match envelope.reason.as_deref() {
            Some(reason) => Self::from_reason(reason, message),
            None => Self::from_status(status, message),
        }
    }

    /// Map a cloud `reason` string (from an error envelope or a failed
    /// operation) to a typed error.
    pub fn from_reason(reason: &str, message: String) -> Self {
        match reason {
            "forbidden" if is_quota_message(&message) => ApiError::Quota {
                resource: quota_resource(&message),
                message,
            },
            "forbidden" => ApiError::Auth(message),
            "not-found" => ApiError::NotFound(message),
            "busy" | "partial" => ApiError::Busy(message),
            "conflict" | "incorrect" | "unsupported" => ApiError::Conflict(message),
            "fault" | "unknown" => ApiError::Internal(message),
            other => ApiError::Internal(format!("{message} (reason: {other})")),
        }
    }

    fn from_status(status: http::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 | 409 => ApiError::Conflict(message),
            401 | 403 if is_quota_message(&message) => ApiError::Quota {
                resource: quota_resource(&message),
                message,
            },
            401 | 403 => ApiError::Auth(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::Busy(message),
            _ => ApiError::Internal(message),
        }
    }
}

/// Wire shape of the cloud error body.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
    reason: Option<String>,
}

fn is_quota_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("quota")
}

/// Best-effort extraction of the limiting resource from a quota message
/// such as `"Quota exceeded for resource instance"`.
fn quota_resource(message: &str) -> String {
    let mut words = message.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("resource")
            && let Some(name) = words.next()
        {
            return name
                .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-')
                .to_string();
        }
    }
    "unknown".to_string()
}
