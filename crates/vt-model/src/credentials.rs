//! Credential boundary
//!
//! Runners never read secrets directly; they receive a [`CredentialsProvider`]
//! and ask it for a [`Connection`] by identifier. Secrets are redacted from
//! every `Debug` rendering.

use crate::error::CredentialsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Authentication for one remote system
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// HTTP basic auth
    Basic { username: String, password: String },
    /// Bearer token
    Bearer { token: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Auth::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Resolved connection to a tracker or source-control server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Server base URL, without trailing slash
    pub base_url: String,
    pub auth: Auth,
}

impl Connection {
    /// Create connection with basic auth
    #[inline]
    #[must_use]
    pub fn basic(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            auth: Auth::Basic {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Create connection with a bearer token
    #[inline]
    #[must_use]
    pub fn bearer(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            auth: Auth::Bearer {
                token: token.into(),
            },
        }
    }
}

fn trim_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// Connection as written in a settings file
///
/// Secrets are never stored inline; they are read from the named
/// environment variables at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl ConnectionEntry {
    /// Resolve the entry using the process environment
    ///
    /// # Errors
    /// See [`ConnectionEntry::resolve_with`].
    pub fn resolve(&self, id: &str) -> Result<Connection, CredentialsError> {
        self.resolve_with(id, |name| std::env::var(name).ok())
    }

    /// Resolve the entry with a custom secret lookup
    ///
    /// A token wins over basic auth when both are configured.
    ///
    /// # Errors
    /// `InvalidConnection` for incomplete entries, `MissingSecret` when the
    /// lookup has no value for a referenced variable.
    pub fn resolve_with<F>(&self, id: &str, lookup: F) -> Result<Connection, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.base_url.trim().is_empty() {
            return Err(CredentialsError::InvalidConnection {
                id: id.to_string(),
                message: "base_url is empty".to_string(),
            });
        }

        let secret = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CredentialsError::MissingSecret(name.to_string()))
        };

        match (&self.token_env, &self.username, &self.password_env) {
            (Some(token_env), _, _) => Ok(Connection::bearer(&self.base_url, secret(token_env)?)),
            (None, Some(username), Some(password_env)) => Ok(Connection::basic(
                &self.base_url,
                username,
                secret(password_env)?,
            )),
            _ => Err(CredentialsError::InvalidConnection {
                id: id.to_string(),
                message: "either token_env or username with password_env is required".to_string(),
            }),
        }
    }
}

/// Source of tracker and source-control connections
pub trait CredentialsProvider: Send + Sync {
    /// Tracker connection for an identifier
    ///
    /// # Errors
    /// `UnknownIdentifier` when nothing is registered under `id`.
    fn tracker(&self, id: &str) -> Result<Connection, CredentialsError>;

    /// Source-control connection for an identifier
    ///
    /// # Errors
    /// `UnknownIdentifier` when nothing is registered under `id`.
    fn source_control(&self, id: &str) -> Result<Connection, CredentialsError>;
}

/// In-memory credentials, keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    trackers: HashMap<String, Connection>,
    source_control: HashMap<String, Connection>,
}

impl StaticCredentials {
    /// Create empty provider
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With tracker connection
    #[inline]
    #[must_use]
    pub fn with_tracker(mut self, id: impl Into<String>, connection: Connection) -> Self {
        self.trackers.insert(id.into(), connection);
        self
    }

    /// With source-control connection
    #[inline]
    #[must_use]
    pub fn with_source_control(mut self, id: impl Into<String>, connection: Connection) -> Self {
        self.source_control.insert(id.into(), connection);
        self
    }

    /// Resolve settings-file entries into a provider
    ///
    /// # Errors
    /// The first entry that fails to resolve.
    pub fn from_entries<'a, T, S>(trackers: T, source_control: S) -> Result<Self, CredentialsError>
    where
        T: IntoIterator<Item = (&'a String, &'a ConnectionEntry)>,
        S: IntoIterator<Item = (&'a String, &'a ConnectionEntry)>,
    {
        let mut provider = Self::new();
        for (id, entry) in trackers {
            provider.trackers.insert(id.clone(), entry.resolve(id)?);
        }
        for (id, entry) in source_control {
            provider.source_control.insert(id.clone(), entry.resolve(id)?);
        }
        Ok(provider)
    }
}

impl CredentialsProvider for StaticCredentials {
    fn tracker(&self, id: &str) -> Result<Connection, CredentialsError> {
        self.trackers
            .get(id)
            .cloned()
            .ok_or_else(|| CredentialsError::UnknownIdentifier {
                kind: "tracker",
                id: id.to_string(),
            })
    }

    fn source_control(&self, id: &str) -> Result<Connection, CredentialsError> {
        self.source_control
            .get(id)
            .cloned()
            .ok_or_else(|| CredentialsError::UnknownIdentifier {
                kind: "source control",
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ConnectionEntry {
        ConnectionEntry {
            base_url: "https://jira.example.com/".to_string(),
            username: Some("bot".to_string()),
            password_env: Some("JIRA_PASSWORD".to_string()),
            token_env: None,
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let connection = Connection::basic("https://jira", "bot", "hunter2");
        let rendered = format!("{connection:?}");
        assert!(rendered.contains("bot"));
        assert!(!rendered.contains("hunter2"));

        let rendered = format!("{:?}", Auth::Bearer { token: "abc123".into() });
        assert!(!rendered.contains("abc123"));
    }

    #[test]
    fn resolve_basic_entry() {
        let connection = entry()
            .resolve_with("jira", |name| (name == "JIRA_PASSWORD").then(|| "pw".to_string()))
            .unwrap();
        assert_eq!(connection.base_url, "https://jira.example.com");
        assert_eq!(
            connection.auth,
            Auth::Basic {
                username: "bot".into(),
                password: "pw".into()
            }
        );
    }

    #[test]
    fn token_wins_over_basic() {
        let mut entry = entry();
        entry.token_env = Some("JIRA_TOKEN".into());
        let connection = entry.resolve_with("jira", |_| Some("t".into())).unwrap();
        assert!(matches!(connection.auth, Auth::Bearer { .. }));
    }

    #[test]
    fn missing_secret_is_reported() {
        let err = entry().resolve_with("jira", |_| None).unwrap_err();
        assert!(matches!(err, CredentialsError::MissingSecret(name) if name == "JIRA_PASSWORD"));
    }

    #[test]
    fn incomplete_entry_rejected() {
        let mut entry = entry();
        entry.password_env = None;
        assert!(matches!(
            entry.resolve_with("jira", |_| Some("x".into())),
            Err(CredentialsError::InvalidConnection { .. })
        ));
    }

    #[test]
    fn static_provider_lookup() {
        let provider = StaticCredentials::new()
            .with_tracker("jira", Connection::bearer("https://jira", "t"))
            .with_source_control("bb", Connection::bearer("https://bitbucket", "t"));

        assert!(provider.tracker("jira").is_ok());
        assert!(provider.source_control("bb").is_ok());
        assert!(matches!(
            provider.tracker("bb"),
            Err(CredentialsError::UnknownIdentifier { kind: "tracker", .. })
        ));
    }
}
