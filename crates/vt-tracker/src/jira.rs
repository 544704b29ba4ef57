//! Jira REST v2 client (reqwest-based)
//!
//! Endpoints:
//! - `POST /rest/api/2/issue`, `PUT /rest/api/2/issue/{key}`
//! - `POST /rest/api/2/search` (paginated with `startAt`)
//! - `GET|POST /rest/api/2/issue/{key}/transitions`
//! - `GET /rest/api/2/field`, `GET /rest/api/2/issue/createmeta`

use crate::client::TicketClient;
use crate::error::{TrackerError, TrackerResult};
use crate::types::{FieldValues, SearchQuery, Ticket, TicketFields, TrackerField, Transition};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};
use vt_model::{Auth, Connection};

const API: &str = "rest/api/2";
const PAGE_SIZE: u32 = 50;

/// Jira issue tracker client
#[derive(Debug, Clone)]
pub struct JiraClient {
    base_url: String,
    auth: Auth,
    http: Client,
}

impl JiraClient {
    /// Create client for a resolved connection
    ///
    /// # Errors
    /// `Network` when the HTTP client cannot be built.
    pub fn new(connection: &Connection, timeout: Duration) -> TrackerResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("violation-tickets/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(connection, http))
    }

    /// Create client with a pre-built `reqwest::Client`
    #[must_use]
    pub fn with_http_client(connection: &Connection, http: Client) -> Self {
        Self {
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            auth: connection.auth.clone(),
            http,
        }
    }

    /// Base URL
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API}/{path}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Bearer { token } => builder.bearer_auth(token),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> TrackerResult<reqwest::Response> {
        let response = self
            .authorize(builder.header("Accept", "application/json"))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> TrackerResult<T> {
        let response = self.send(builder).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| TrackerError::UnexpectedResponse {
            status,
            body: format!("failed to parse response: {e}"),
        })
    }

    async fn create(&self, fields: Map<String, Value>) -> TrackerResult<String> {
        #[derive(Deserialize)]
        struct Created {
            key: String,
        }

        let created: Created = self
            .send_json(self.http.post(self.url("issue")).json(&json!({ "fields": fields })))
            .await?;
        debug!(key = %created.key, "jira issue created");
        Ok(created.key)
    }
}

/// Render ticket fields as a Jira `fields` object
fn create_payload(fields: &TicketFields) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("project".into(), json!({ "key": fields.project_key }));
    payload.insert("issuetype".into(), json!({ "name": fields.issue_type }));
    if let Some(priority) = &fields.priority {
        payload.insert("priority".into(), json!({ "name": priority }));
    }
    payload.extend(update_payload(fields));
    payload
}

fn update_payload(fields: &TicketFields) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("summary".into(), Value::String(fields.summary.clone()));
    payload.insert("description".into(), Value::String(fields.description.clone()));
    for (field_id, value) in &fields.custom {
        payload.insert(field_id.clone(), value.clone());
    }
    payload
}

async fn error_from_response(response: reqwest::Response) -> TrackerError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TrackerError::Unauthorized(format!("HTTP {status}"))
        }
        StatusCode::NOT_FOUND => TrackerError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(?retry_after, "jira rate limited");
            TrackerError::RateLimited { retry_after }
        }
        StatusCode::BAD_REQUEST => validation_error(&body),
        s if s.is_server_error() => TrackerError::Server {
            status: s.as_u16(),
            body,
        },
        s => TrackerError::UnexpectedResponse {
            status: s.as_u16(),
            body,
        },
    }
}

fn validation_error(body: &str) -> TrackerError {
    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    struct JiraErrors {
        error_messages: Vec<String>,
        errors: BTreeMap<String, String>,
    }

    match serde_json::from_str::<JiraErrors>(body) {
        Ok(errors) => TrackerError::Validation {
            messages: errors.error_messages,
            field_errors: errors.errors,
        },
        Err(_) => TrackerError::Validation {
            messages: vec![body.to_string()],
            field_errors: BTreeMap::new(),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl JiraIssue {
    fn into_ticket(self, requested: &[String]) -> Ticket {
        let name_of = |value: Option<&Value>, attr: &str| {
            value
                .and_then(|v| v.get(attr))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let summary = self
            .fields
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = name_of(self.fields.get("status"), "name");
        let issue_type = name_of(self.fields.get("issuetype"), "name");
        let parent = self
            .fields
            .get("parent")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let subtasks = self
            .fields
            .get("subtasks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.get("key").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let fields: FieldValues = requested
            .iter()
            .filter_map(|id| {
                self.fields
                    .get(id)
                    .filter(|v| !v.is_null())
                    .map(|v| (id.clone(), v.clone()))
            })
            .collect();

        Ticket {
            key: self.key,
            summary,
            status,
            issue_type,
            parent,
            fields,
            subtasks,
        }
    }
}

#[async_trait::async_trait]
impl TicketClient for JiraClient {
    async fn create_ticket(&self, fields: &TicketFields) -> TrackerResult<String> {
        self.create(create_payload(fields)).await
    }

    async fn create_subtask(&self, parent: &str, fields: &TicketFields) -> TrackerResult<String> {
        let mut payload = create_payload(fields);
        payload.insert("parent".into(), json!({ "key": parent }));
        self.create(payload).await
    }

    async fn update_fields(&self, key: &str, fields: &TicketFields) -> TrackerResult<()> {
        self.send(
            self.http
                .put(self.url(&format!("issue/{key}")))
                .json(&json!({ "fields": update_payload(fields) })),
        )
        .await?;
        debug!(key, "jira issue updated");
        Ok(())
    }

    async fn search(&self, query: &SearchQuery, max_results: u32) -> TrackerResult<Vec<Ticket>> {
        let jql = query.to_jql();
        let mut requested: Vec<String> = ["summary", "status", "issuetype", "parent", "subtasks"]
            .into_iter()
            .map(str::to_string)
            .collect();
        requested.extend(query.fields.iter().cloned());

        let mut tickets = Vec::new();
        let mut start_at: u32 = 0;
        while (tickets.len() as u32) < max_results {
            let page_size = PAGE_SIZE.min(max_results - tickets.len() as u32);
            let page: SearchPage = self
                .send_json(self.http.post(self.url("search")).json(&json!({
                    "jql": jql,
                    "startAt": start_at,
                    "maxResults": page_size,
                    "fields": requested,
                })))
                .await?;

            let received = page.issues.len() as u32;
            tickets.extend(page.issues.into_iter().map(|i| i.into_ticket(&query.fields)));
            start_at += received;
            if received == 0 || start_at >= page.total {
                break;
            }
        }
        debug!(%jql, found = tickets.len(), "jira search");
        Ok(tickets)
    }

    async fn list_transitions(&self, key: &str) -> TrackerResult<Vec<Transition>> {
        #[derive(Deserialize)]
        struct Transitions {
            #[serde(default)]
            transitions: Vec<JiraTransition>,
        }
        #[derive(Deserialize)]
        struct JiraTransition {
            id: String,
            name: String,
            to: Option<Named>,
        }
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let response: Transitions = self
            .send_json(self.http.get(self.url(&format!("issue/{key}/transitions"))))
            .await?;
        Ok(response
            .transitions
            .into_iter()
            .map(|t| {
                let to_status = t.to.map_or_else(|| t.name.clone(), |to| to.name);
                Transition::new(t.id, t.name, to_status)
            })
            .collect())
    }

    async fn apply_transition(&self, key: &str, transition_id: &str) -> TrackerResult<()> {
        self.send(
            self.http
                .post(self.url(&format!("issue/{key}/transitions")))
                .json(&json!({ "transition": { "id": transition_id } })),
        )
        .await?;
        debug!(key, transition_id, "jira transition applied");
        Ok(())
    }

    async fn list_fields(&self) -> TrackerResult<Vec<TrackerField>> {
        self.send_json(self.http.get(self.url("field"))).await
    }

    async fn field_options(
        &self,
        project_key: &str,
        issue_type: &str,
    ) -> TrackerResult<HashMap<String, Vec<String>>> {
        let meta: Value = self
            .send_json(self.http.get(self.url("issue/createmeta")).query(&[
                ("projectKeys", project_key),
                ("issuetypeNames", issue_type),
                ("expand", "projects.issuetypes.fields"),
            ]))
            .await?;

        let mut options = HashMap::new();
        let fields = meta
            .pointer("/projects/0/issuetypes/0/fields")
            .and_then(Value::as_object);
        for (field_id, field) in fields.into_iter().flatten() {
            let Some(allowed) = field.get("allowedValues").and_then(Value::as_array) else {
                continue;
            };
            let values: Vec<String> = allowed
                .iter()
                .filter_map(|v| {
                    v.get("value")
                        .or_else(|| v.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect();
            if !values.is_empty() {
                options.insert(field_id.clone(), values);
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payload_shape() {
        let fields = TicketFields::new("SEC", "Bug", "Fix lib-a [lib-a]")
            .with_description("details")
            .with_priority(Some("High".into()))
            .with_custom("customfield_1", json!(9));

        let payload = Value::Object(create_payload(&fields));
        assert_eq!(payload["project"]["key"], "SEC");
        assert_eq!(payload["issuetype"]["name"], "Bug");
        assert_eq!(payload["priority"]["name"], "High");
        assert_eq!(payload["summary"], "Fix lib-a [lib-a]");
        assert_eq!(payload["customfield_1"], 9);
    }

    #[test]
    fn update_payload_omits_project_and_type() {
        let fields = TicketFields::new("SEC", "Bug", "s");
        let payload = update_payload(&fields);
        assert!(!payload.contains_key("project"));
        assert!(!payload.contains_key("issuetype"));
        assert!(payload.contains_key("summary"));
    }

    #[test]
    fn validation_error_parses_jira_body() {
        let err = validation_error(
            r#"{"errorMessages":[],"errors":{"customfield_10020":"Option 'x' is not valid"}}"#,
        );
        match err {
            TrackerError::Validation { field_errors, .. } => {
                assert_eq!(field_errors["customfield_10020"], "Option 'x' is not valid");
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(matches!(
            validation_error("plain text"),
            TrackerError::Validation { messages, .. } if messages == vec!["plain text".to_string()]
        ));
    }
}
