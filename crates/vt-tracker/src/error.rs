//! Tracker call errors
//!
//! Every [`crate::TicketClient`] call fails with exactly one [`TrackerError`].
//! Classification drives the retry layer:
//! - retryable: rate limiting, network failures, 5xx responses
//! - terminal: everything else, recorded against the calling group

use std::collections::BTreeMap;
use std::time::Duration;

/// Result alias for tracker calls
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Tracker call error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    /// Credentials rejected (401/403)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Tracker asked us to slow down (429)
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Ticket, transition or endpoint does not exist (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload rejected (400) with per-field messages
    #[error("validation failed: {}", format_validation(.messages, .field_errors))]
    Validation {
        messages: Vec<String>,
        field_errors: BTreeMap<String, String>,
    },

    /// Connection, TLS or timeout failure
    #[error("network error: {0}")]
    Network(String),

    /// Server-side failure (5xx)
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Unexpected status code or unparsable body
    #[error("unexpected response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    /// Transient failure persisted through every attempt
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TrackerError>,
    },
}

fn format_validation(messages: &[String], field_errors: &BTreeMap<String, String>) -> String {
    let mut parts: Vec<String> = messages.to_vec();
    parts.extend(
        field_errors
            .iter()
            .map(|(field, message)| format!("{field}: {message}")),
    );
    if parts.is_empty() {
        "no details".to_string()
    } else {
        parts.join("; ")
    }
}

impl TrackerError {
    /// Create validation error for a single field
    #[inline]
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), message.into());
        Self::Validation {
            messages: Vec::new(),
            field_errors,
        }
    }

    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::RateLimited { .. } | TrackerError::Network(_) | TrackerError::Server { .. }
        )
    }

    /// Check if this is a rate limit response
    #[inline]
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TrackerError::RateLimited { .. })
    }

    /// Short machine-readable kind, used in reports and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::Unauthorized(_) => "unauthorized",
            TrackerError::RateLimited { .. } => "rate_limited",
            TrackerError::NotFound(_) => "not_found",
            TrackerError::Validation { .. } => "validation",
            TrackerError::Network(_) => "network",
            TrackerError::Server { .. } => "server",
            TrackerError::UnexpectedResponse { .. } => "unexpected_response",
            TrackerError::RetriesExhausted { last, .. } => last.kind(),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackerError::UnexpectedResponse {
                status: err.status().map_or(0, |s| s.as_u16()),
                body: err.to_string(),
            }
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TrackerError::RateLimited { retry_after: None }.is_retryable());
        assert!(TrackerError::Network("reset".into()).is_retryable());
        assert!(TrackerError::Server {
            status: 503,
            body: String::new()
        }
        .is_retryable());

        assert!(!TrackerError::Unauthorized("nope".into()).is_retryable());
        assert!(!TrackerError::NotFound("SEC-1".into()).is_retryable());
        assert!(!TrackerError::field("priority", "invalid").is_retryable());
    }

    #[test]
    fn exhausted_reports_inner_kind() {
        let err = TrackerError::RetriesExhausted {
            attempts: 3,
            last: Box::new(TrackerError::Network("timeout".into())),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn validation_display_lists_fields() {
        let err = TrackerError::Validation {
            messages: vec!["bad payload".into()],
            field_errors: BTreeMap::from([("customfield_1".to_string(), "not an option".to_string())]),
        };
        assert_eq!(
            err.to_string(),
            "validation failed: bad payload; customfield_1: not an option"
        );
    }
}
