//! Settings file
//!
//! One TOML or YAML document holding the notification configuration and the
//! connections it refers to:
//!
//! ```toml
//! http_timeout_secs = 30
//!
//! [notification]
//! project_key = "SEC"
//! tracker_credentials_id = "jira"
//!
//! [credentials.jira]
//! base_url = "https://jira.example.com"
//! username = "ci-bot"
//! password_env = "JIRA_PASSWORD"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use vt_model::{
    parse_document, ConfigError, ConfigFormat, ConnectionEntry, CredentialsError,
    NotificationConfig, StaticCredentials,
};

fn default_timeout() -> u64 {
    30
}

/// Parsed settings file
#[derive(Debug, Clone, Deserialize)]
pub struct CliSettings {
    pub notification: NotificationConfig,
    /// Connection entries keyed by credential identifier
    #[serde(default)]
    pub credentials: BTreeMap<String, ConnectionEntry>,
    #[serde(default = "default_timeout")]
    pub http_timeout_secs: u64,
}

impl CliSettings {
    /// Read, normalize and validate a settings file
    ///
    /// # Errors
    /// IO, format, parse or validation errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, ConfigFormat::from_path(path)?)
    }

    /// Parse, normalize and validate settings text
    ///
    /// # Errors
    /// Parse or validation errors.
    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let mut settings: Self = parse_document(text, format)?;
        settings.notification.normalize();
        settings.notification.validate()?;
        if settings.http_timeout_secs == 0 {
            return Err(ConfigError::invalid("http_timeout_secs", "must be at least 1"));
        }
        Ok(settings)
    }

    /// HTTP timeout for tracker and source-control calls
    #[inline]
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Resolve only the connections this run refers to
    ///
    /// # Errors
    /// A referenced entry whose secret is missing or incomplete.
    pub fn credentials(&self) -> Result<StaticCredentials, CredentialsError> {
        let tracker = self
            .credentials
            .get_key_value(&self.notification.tracker_credentials_id);
        let source_control = self
            .notification
            .scm_credentials_id
            .as_ref()
            .and_then(|id| self.credentials.get_key_value(id));
        StaticCredentials::from_entries(tracker, source_control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_model::{AggregationMode, CredentialsProvider};

    const TOML: &str = r#"
        [notification]
        project_key = "SEC"
        tracker_credentials_id = "jira"
        aggregation = "by_component"

        [credentials.jira]
        base_url = "https://jira.example.com/"
        token_env = "VT_TEST_UNSET_TOKEN_VARIABLE"
    "#;

    #[test]
    fn parses_toml_with_defaults() {
        let settings = CliSettings::parse(TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(settings.notification.aggregation_mode(), AggregationMode::ByComponent);
        assert_eq!(settings.http_timeout(), Duration::from_secs(30));
        assert!(settings.credentials.contains_key("jira"));
    }

    #[test]
    fn yaml_with_legacy_toggles() {
        let yaml = r"
notification:
  project_key: SEC
  job_jira_credentials_id: jira
  should_aggregate_tickets_by_component: true
";
        let settings = CliSettings::parse(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(settings.notification.aggregation_mode(), AggregationMode::ByComponent);
    }

    #[test]
    fn missing_secret_reported_on_resolution() {
        let settings = CliSettings::parse(TOML, ConfigFormat::Toml).unwrap();
        let err = settings.credentials().unwrap_err();
        assert!(matches!(err, CredentialsError::MissingSecret(name) if name == "VT_TEST_UNSET_TOKEN_VARIABLE"));
    }

    #[test]
    fn unreferenced_entries_are_not_resolved() {
        let toml = r#"
            [notification]
            project_key = "SEC"
            tracker_credentials_id = "absent"

            [credentials.other]
            base_url = "https://jira.example.com"
            token_env = "VT_TEST_UNSET_TOKEN_VARIABLE"
        "#;
        let settings = CliSettings::parse(toml, ConfigFormat::Toml).unwrap();
        let provider = settings.credentials().unwrap();
        assert!(provider.tracker("absent").is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let toml = format!("http_timeout_secs = 0\n{TOML}");
        assert!(CliSettings::parse(&toml, ConfigFormat::Toml).is_err());
    }
}
