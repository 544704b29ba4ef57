//! Status reporting errors

use vt_model::CredentialsError;

/// Build status posting error
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Commit reference is empty
    #[error("commit reference is empty")]
    MissingCommit,

    /// Connection could not be resolved
    #[error("credentials: {0}")]
    Credentials(#[from] CredentialsError),

    /// Credentials rejected
    #[error("unauthorized ({status})")]
    Unauthorized { status: u16 },

    /// Host rejected the status payload
    #[error("status rejected {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Server-side failure
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Connection, TLS or timeout failure
    #[error("network error: {0}")]
    Network(String),
}

impl StatusError {
    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StatusError::Server { .. } | StatusError::Network(_))
    }
}

impl From<reqwest::Error> for StatusError {
    fn from(err: reqwest::Error) -> Self {
        StatusError::Network(err.to_string())
    }
}
