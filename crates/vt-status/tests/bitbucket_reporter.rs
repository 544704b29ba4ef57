//! Bitbucket build-status reporter against a mock server

use serde_json::json;
use std::time::Duration;
use vt_model::{Connection, StaticCredentials};
use vt_status::{BitbucketReporter, BuildStatus, StatusError, DEFAULT_STATUS_KEY};
use wiremock::matchers::{basic_auth, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMMIT: &str = "4f2a9c1d";

fn reporter(server: &MockServer) -> BitbucketReporter {
    BitbucketReporter::with_http_client(
        &Connection::basic(server.uri(), "ci", "pw"),
        reqwest::Client::new(),
    )
}

#[tokio::test]
async fn posts_keyed_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/rest/build-status/1.0/commits/{COMMIT}")))
        .and(basic_auth("ci", "pw"))
        .and(body_json(json!({
            "state": "FAILED",
            "key": DEFAULT_STATUS_KEY,
            "name": "Policy Evaluation",
            "url": "https://iq.example.com/report/1",
            "description": "3 policy violations"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let status = BuildStatus::new(COMMIT, false, "https://iq.example.com/report/1")
        .with_description("3 policy violations");
    reporter(&server).report(&status).await.unwrap();
}

#[tokio::test]
async fn retries_once_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    reporter(&server)
        .report(&BuildStatus::new(COMMIT, true, "u"))
        .await
        .unwrap();
}

#[tokio::test]
async fn gives_up_after_second_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let err = reporter(&server)
        .report(&BuildStatus::new(COMMIT, true, "u"))
        .await
        .unwrap_err();
    assert!(matches!(err, StatusError::Server { status: 502, .. }));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = reporter(&server)
        .report(&BuildStatus::new(COMMIT, true, "u"))
        .await
        .unwrap_err();
    assert!(matches!(err, StatusError::Unauthorized { status: 401 }));
}

#[tokio::test]
async fn resolves_source_control_connection() {
    let credentials = StaticCredentials::new()
        .with_tracker("jira", Connection::bearer("https://jira", "t"));

    let err = BitbucketReporter::from_credentials(&credentials, "bitbucket", Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, StatusError::Credentials(_)));
}
