//! Jira REST client against a mock server

use pretty_assertions::assert_eq;
use serde_json::json;
use vt_model::Connection;
use vt_tracker::{JiraClient, SearchQuery, TicketClient, TicketFields, TrackerError};
use wiremock::matchers::{basic_auth, bearer_token, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> JiraClient {
    JiraClient::with_http_client(
        &Connection::basic(server.uri(), "bot", "secret"),
        reqwest::Client::new(),
    )
}

fn issue(key: &str, summary: &str, status: &str) -> serde_json::Value {
    json!({
        "id": "1",
        "key": key,
        "fields": {
            "summary": summary,
            "status": { "name": status },
            "issuetype": { "name": "Bug" },
            "subtasks": [{ "key": format!("{key}-sub") }],
            "customfield_10010": "lib-a",
        }
    })
}

#[tokio::test]
async fn create_ticket_posts_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .and(basic_auth("bot", "secret"))
        .and(body_partial_json(json!({
            "fields": {
                "project": { "key": "SEC" },
                "issuetype": { "name": "Bug" },
                "summary": "Policy violations in lib-a [lib-a]",
                "customfield_10010": "lib-a",
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "10001", "key": "SEC-1", "self": "http://x"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fields = TicketFields::new("SEC", "Bug", "Policy violations in lib-a [lib-a]")
        .with_custom("customfield_10010", json!("lib-a"));
    let key = client(&server).create_ticket(&fields).await.unwrap();
    assert_eq!(key, "SEC-1");
}

#[tokio::test]
async fn create_subtask_links_parent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .and(body_partial_json(json!({ "fields": { "parent": { "key": "SEC-1" } } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "2", "key": "SEC-2" })))
        .expect(1)
        .mount(&server)
        .await;

    let fields = TicketFields::new("SEC", "Sub-task", "v-1 [v-1]");
    let key = client(&server).create_subtask("SEC-1", &fields).await.unwrap();
    assert_eq!(key, "SEC-2");
}

#[tokio::test]
async fn bearer_auth_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/field"))
        .and(bearer_token("tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "customfield_10010",
                "name": "Component",
                "custom": true,
                "schema": { "type": "string", "custom": "com.atlassian.jira.plugin.system.customfieldtypes:textfield", "customId": 10010 }
            },
            {
                "id": "labels",
                "name": "Labels",
                "custom": false,
                "schema": { "type": "array", "items": "string", "system": "labels" }
            }
        ])))
        .mount(&server)
        .await;

    let client = JiraClient::with_http_client(
        &Connection::bearer(server.uri(), "tok"),
        reqwest::Client::new(),
    );
    let fields = client.list_fields().await.unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].schema.as_ref().unwrap().kind, "string");
    assert_eq!(fields[1].schema.as_ref().unwrap().items.as_deref(), Some("string"));
}

#[tokio::test]
async fn search_paginates_until_total() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/search"))
        .and(body_partial_json(json!({ "startAt": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 0, "maxResults": 1, "total": 2,
            "issues": [issue("SEC-1", "a [lib-a]", "Open")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/search"))
        .and(body_partial_json(json!({ "startAt": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 1, "maxResults": 1, "total": 2,
            "issues": [issue("SEC-2", "b [lib-a]", "Done")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = SearchQuery::new("SEC", "Bug")
        .with_field("customfield_10010", "lib-a")
        .returning(vec!["customfield_10010".into()]);
    let tickets = client(&server).search(&query, 10).await.unwrap();

    assert_eq!(tickets.len(), 2);
    assert_eq!(tickets[0].key, "SEC-1");
    assert_eq!(tickets[0].status, "Open");
    assert_eq!(tickets[0].subtasks, vec!["SEC-1-sub".to_string()]);
    assert_eq!(tickets[0].field_text("customfield_10010"), Some("lib-a"));
    assert_eq!(tickets[1].status, "Done");
}

#[tokio::test]
async fn search_stops_at_max_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/search"))
        .and(body_partial_json(json!({ "maxResults": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 0, "maxResults": 1, "total": 5,
            "issues": [issue("SEC-1", "a", "Open")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tickets = client(&server)
        .search(&SearchQuery::new("SEC", "Bug"), 1)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 1);
}

#[tokio::test]
async fn transitions_are_listed_and_applied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/SEC-1/transitions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [
                { "id": "11", "name": "Start Progress", "to": { "name": "In Progress" } },
                { "id": "21", "name": "Close" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue/SEC-1/transitions"))
        .and(body_partial_json(json!({ "transition": { "id": "11" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let transitions = client.list_transitions("SEC-1").await.unwrap();
    assert_eq!(transitions[0].to_status, "In Progress");
    assert_eq!(transitions[1].to_status, "Close");

    client.apply_transition("SEC-1", "11").await.unwrap();
}

#[tokio::test]
async fn field_options_read_from_createmeta() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/createmeta"))
        .and(query_param("projectKeys", "SEC"))
        .and(query_param("issuetypeNames", "Bug"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "projects": [{
                "issuetypes": [{
                    "fields": {
                        "customfield_10020": {
                            "allowedValues": [{ "value": "Critical" }, { "value": "High" }]
                        },
                        "priority": { "allowedValues": [{ "name": "Major" }] },
                        "summary": {}
                    }
                }]
            }]
        })))
        .mount(&server)
        .await;

    let options = client(&server).field_options("SEC", "Bug").await.unwrap();
    assert_eq!(options["customfield_10020"], vec!["Critical".to_string(), "High".to_string()]);
    assert_eq!(options["priority"], vec!["Major".to_string()]);
    assert!(!options.contains_key("summary"));
}

#[tokio::test]
async fn error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-400"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorMessages": [],
            "errors": { "customfield_10020": "Option value 'Severe' is not valid" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-401"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-429"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-503"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = client(&server);
    let fields = TicketFields::new("SEC", "Bug", "s");

    match client.update_fields("SEC-400", &fields).await {
        Err(TrackerError::Validation { field_errors, .. }) => {
            assert!(field_errors.contains_key("customfield_10020"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(matches!(
        client.update_fields("SEC-401", &fields).await,
        Err(TrackerError::Unauthorized(_))
    ));
    match client.update_fields("SEC-429", &fields).await {
        Err(TrackerError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    match client.update_fields("SEC-503", &fields).await {
        Err(err @ TrackerError::Server { .. }) => assert!(err.is_retryable()),
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(matches!(
        client.update_fields("SEC-404", &fields).await,
        Err(TrackerError::NotFound(_))
    ));
}

#[tokio::test]
async fn unparsable_body_is_unexpected_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/field"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    assert!(matches!(
        client(&server).list_fields().await,
        Err(TrackerError::UnexpectedResponse { status: 200, .. })
    ));
}

#[tokio::test]
async fn unreachable_host_is_network_error() {
    let client = JiraClient::with_http_client(
        &Connection::basic("http://127.0.0.1:1", "bot", "secret"),
        reqwest::Client::new(),
    );
    let err = client.list_fields().await.unwrap_err();
    assert!(matches!(err, TrackerError::Network(_)));
    assert!(err.is_retryable());
}
