//! Error types for the data model
//!
//! Configuration errors are always fatal: a run never starts with a config
//! that failed [`crate::NotificationConfig::validate`].

use std::path::PathBuf;

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required setting is missing while its feature is enabled
    #[error("missing required setting `{setting}`: {reason}")]
    MissingSetting {
        setting: &'static str,
        reason: &'static str,
    },

    /// Setting has a value outside its allowed range
    #[error("invalid setting `{setting}`: {message}")]
    InvalidSetting {
        setting: &'static str,
        message: String,
    },

    /// A field mapping entry is malformed
    #[error("invalid field mapping for `{field}`: {message}")]
    InvalidFieldMapping { field: String, message: String },

    /// The same tracker field is mapped twice
    #[error("tracker field `{0}` is mapped more than once")]
    DuplicateFieldMapping(String),

    /// Date pattern cannot be used for formatting
    #[error("invalid date format pattern: {0}")]
    InvalidDateFormat(String),

    /// Document was written for a newer schema
    #[error("unsupported schema version {found} (this build understands up to {supported})")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    /// File extension does not name a known format
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// IO error while reading a configuration file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create invalid setting error
    #[inline]
    pub fn invalid(setting: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting,
            message: message.into(),
        }
    }

    /// Create invalid field mapping error
    #[inline]
    pub fn invalid_mapping(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFieldMapping {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Credential resolution errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// No connection registered under the identifier
    #[error("no {kind} connection registered for `{id}`")]
    UnknownIdentifier { kind: &'static str, id: String },

    /// Secret referenced by the connection is not available
    #[error("secret `{0}` is not set")]
    MissingSecret(String),

    /// Connection entry is incomplete
    #[error("connection `{id}` is invalid: {message}")]
    InvalidConnection { id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_display() {
        let err = ConfigError::MissingSetting {
            setting: "project_key",
            reason: "required when notifications are enabled",
        };
        assert!(err.to_string().contains("project_key"));
    }

    #[test]
    fn credentials_error_display() {
        let err = CredentialsError::UnknownIdentifier {
            kind: "tracker",
            id: "jira-main".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no tracker connection registered for `jira-main`"
        );
    }
}
