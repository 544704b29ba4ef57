//! Error types for reconciliation
//!
//! Two tiers:
//! - [`RunError`]: fatal, raised before any write begins
//! - [`MappingError`] / [`TransitionError`]: non-fatal, recorded per group in
//!   the [`crate::RunReport`]

use vt_model::{ConfigError, CredentialsError};
use vt_tracker::TrackerError;

/// Fatal run error
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Configuration failed validation
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tracker connection could not be resolved
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// Field catalog could not be read while custom fields are mapped
    #[error("failed to read tracker field catalog: {0}")]
    FieldCatalog(#[source] TrackerError),

    /// A type override names an unknown field type
    #[error("invalid type override `{original}` -> `{target}`")]
    InvalidTypeOverride { original: String, target: String },

    /// Tracker client could not be constructed
    #[error("tracker client error: {0}")]
    Client(#[source] TrackerError),
}

impl RunError {
    /// Check if the error comes from configuration rather than the tracker
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Credentials(_) | Self::InvalidTypeOverride { .. }
        )
    }
}

/// Field value could not be coerced; the field is omitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// Value does not match any allowed option
    #[error("field `{field}`: value `{value}` matches no allowed option")]
    UnmatchedOption { field: String, value: String },

    /// Number field received a non-numeric value
    #[error("field `{field}`: value `{value}` is not numeric")]
    NotNumeric { field: String, value: String },

    /// Date field received a value that is not a date
    #[error("field `{field}`: value `{value}` is not a date")]
    NotDate { field: String, value: String },

    /// Dynamic data has no entry for the mapped key
    #[error("field `{field}`: dynamic data has no `{key}` entry")]
    MissingDynamicData { field: String, key: String },
}

/// Workflow transition could not be applied; the ticket keeps its status
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransitionError {
    /// No available transition reaches the target
    #[error("no transition to `{target}` (available: {})", .available.join(", "))]
    NotFound {
        target: String,
        available: Vec<String>,
    },

    /// Several transitions reach the target
    #[error("ambiguous transition to `{target}`: {}", .candidates.join(", "))]
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },

    /// Tracker call failed
    #[error("transition call failed: {0}")]
    Tracker(#[from] TrackerError),
}
