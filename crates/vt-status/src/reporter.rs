//! Bitbucket build-status reporter
//!
//! `POST {base}/rest/build-status/1.0/commits/{commit}` with a stable `key`.

use crate::error::StatusError;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use vt_model::{Auth, Connection, CredentialsProvider};

/// Key under which the status is upserted
pub const DEFAULT_STATUS_KEY: &str = "policy-evaluation";

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Build state understood by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
    Successful,
    Failed,
}

/// One build status annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatus {
    /// Commit hash
    pub commit: String,
    pub passing: bool,
    /// Link back to the evaluation report
    pub url: String,
    pub description: Option<String>,
}

impl BuildStatus {
    /// Create status for a commit
    #[inline]
    #[must_use]
    pub fn new(commit: impl Into<String>, passing: bool, url: impl Into<String>) -> Self {
        Self {
            commit: commit.into(),
            passing,
            url: url.into(),
            description: None,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Host build state
    #[inline]
    #[must_use]
    pub fn state(&self) -> BuildState {
        if self.passing {
            BuildState::Successful
        } else {
            BuildState::Failed
        }
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    state: BuildState,
    key: &'a str,
    name: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Posts build status to Bitbucket Server
#[derive(Debug, Clone)]
pub struct BitbucketReporter {
    base_url: String,
    auth: Auth,
    http: Client,
    key: String,
    name: String,
}

impl BitbucketReporter {
    /// Create reporter for a resolved connection
    ///
    /// # Errors
    /// `Network` when the HTTP client cannot be built.
    pub fn new(connection: &Connection, timeout: Duration) -> Result<Self, StatusError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StatusError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(connection, http))
    }

    /// Create reporter from the source-control credential identifier
    ///
    /// # Errors
    /// Unknown identifier, or HTTP client construction failure.
    pub fn from_credentials(
        provider: &dyn CredentialsProvider,
        id: &str,
        timeout: Duration,
    ) -> Result<Self, StatusError> {
        Self::new(&provider.source_control(id)?, timeout)
    }

    /// Create reporter with a pre-built `reqwest::Client`
    #[must_use]
    pub fn with_http_client(connection: &Connection, http: Client) -> Self {
        Self {
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            auth: connection.auth.clone(),
            http,
            key: DEFAULT_STATUS_KEY.to_string(),
            name: "Policy Evaluation".to_string(),
        }
    }

    /// With status key and display name
    #[inline]
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.key = key.into();
        self.name = name.into();
        self
    }

    /// Post a status, retrying once on transient failure
    ///
    /// # Errors
    /// `MissingCommit`, or the last error from the host.
    pub async fn report(&self, status: &BuildStatus) -> Result<(), StatusError> {
        let commit = status.commit.trim();
        if commit.is_empty() {
            return Err(StatusError::MissingCommit);
        }

        match self.post(commit, status).await {
            Err(err) if err.is_transient() => {
                warn!(commit, error = %err, "build status post failed, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.post(commit, status).await
            }
            other => other,
        }?;

        info!(commit, state = ?status.state(), key = %self.key, "build status posted");
        Ok(())
    }

    async fn post(&self, commit: &str, status: &BuildStatus) -> Result<(), StatusError> {
        let url = format!("{}/rest/build-status/1.0/commits/{commit}", self.base_url);
        let payload = Payload {
            state: status.state(),
            key: &self.key,
            name: &self.name,
            url: &status.url,
            description: status.description.as_deref(),
        };
        let builder = self.http.post(&url).json(&payload);
        let builder = match &self.auth {
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Bearer { token } => builder.bearer_auth(token),
        };

        let response = builder.send().await?;
        let code = response.status();
        if code.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(match code {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StatusError::Unauthorized {
                status: code.as_u16(),
            },
            s if s.is_server_error() => StatusError::Server {
                status: s.as_u16(),
                body,
            },
            s => StatusError::Rejected {
                status: s.as_u16(),
                body,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_result() {
        assert_eq!(BuildStatus::new("abc", true, "u").state(), BuildState::Successful);
        assert_eq!(BuildStatus::new("abc", false, "u").state(), BuildState::Failed);
    }

    #[test]
    fn payload_serializes_host_dialect() {
        let payload = Payload {
            state: BuildState::Failed,
            key: "k",
            name: "n",
            url: "http://iq/report",
            description: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["state"], "FAILED");
        assert!(value.get("description").is_none());
    }

    #[tokio::test]
    async fn empty_commit_rejected_without_call() {
        let reporter = BitbucketReporter::with_http_client(
            &Connection::bearer("http://127.0.0.1:1", "t"),
            Client::new(),
        );
        let err = reporter
            .report(&BuildStatus::new("  ", true, "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::MissingCommit));
    }
}
