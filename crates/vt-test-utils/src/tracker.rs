//! In-memory ticket tracker
//!
//! A [`TicketClient`] keeping tickets in a map, with a fixed workflow, a
//! configurable field catalog, a call log and injectable failures.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use vt_tracker::{
    SearchQuery, Ticket, TicketClient, TicketFields, TrackerError, TrackerField, TrackerResult,
    Transition,
};

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTicket { summary: String },
    CreateSubTask { parent: String, summary: String },
    UpdateFields { key: String },
    Search { jql: String },
    ListTransitions { key: String },
    ApplyTransition { key: String, transition_id: String },
    ListFields,
    FieldOptions { issue_type: String },
}

impl Call {
    /// Operation name, as used by failure rules
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Call::CreateTicket { .. } => "create_ticket",
            Call::CreateSubTask { .. } => "create_subtask",
            Call::UpdateFields { .. } => "update_fields",
            Call::Search { .. } => "search",
            Call::ListTransitions { .. } => "list_transitions",
            Call::ApplyTransition { .. } => "apply_transition",
            Call::ListFields => "list_fields",
            Call::FieldOptions { .. } => "field_options",
        }
    }

    /// Whether the call changes tracker state
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::CreateTicket { .. }
                | Call::CreateSubTask { .. }
                | Call::UpdateFields { .. }
                | Call::ApplyTransition { .. }
        )
    }

    fn subject(&self) -> &str {
        match self {
            Call::CreateTicket { summary } | Call::CreateSubTask { summary, .. } => summary,
            Call::UpdateFields { key }
            | Call::ListTransitions { key }
            | Call::ApplyTransition { key, .. } => key,
            Call::Search { jql } => jql,
            Call::FieldOptions { issue_type } => issue_type,
            Call::ListFields => "",
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: &'static str,
    /// Substring of the summary, key or JQL the rule applies to
    matching: Option<String>,
    error: TrackerError,
    /// Remaining failures, `None` for always
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct StoredTicket {
    ticket: Ticket,
    project_key: String,
    written: TicketFields,
    seq: u64,
}

/// Tracker double backed by a concurrent map
#[derive(Debug)]
pub struct InMemoryTracker {
    tickets: DashMap<String, StoredTicket>,
    next_id: AtomicU64,
    workflow: Mutex<Vec<Transition>>,
    catalog: Mutex<Vec<TrackerField>>,
    options: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<FailureRule>>,
    /// Whether search results list a ticket's sub-task keys
    subtask_links: bool,
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTracker {
    /// Create tracker with the default workflow and an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickets: DashMap::new(),
            next_id: AtomicU64::new(1),
            workflow: Mutex::new(default_workflow()),
            catalog: Mutex::new(Vec::new()),
            options: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            subtask_links: true,
        }
    }

    /// Leave sub-task keys out of search results, like trackers that do not
    /// report them
    #[must_use]
    pub fn without_subtask_links(mut self) -> Self {
        self.subtask_links = false;
        self
    }

    /// With field catalog
    #[must_use]
    pub fn with_fields(self, catalog: Vec<TrackerField>) -> Self {
        *self.catalog.lock() = catalog;
        self
    }

    /// With allowed option values for a field
    #[must_use]
    pub fn with_options(self, field_id: &str, values: &[&str]) -> Self {
        self.options.lock().insert(
            field_id.to_string(),
            values.iter().map(|v| (*v).to_string()).collect(),
        );
        self
    }

    /// With workflow transitions
    #[must_use]
    pub fn with_workflow(self, transitions: Vec<Transition>) -> Self {
        *self.workflow.lock() = transitions;
        self
    }

    /// Fail every call of an operation
    pub fn fail_on(&self, operation: &'static str, error: TrackerError) {
        self.push_rule(operation, None, error, None);
    }

    /// Fail calls of an operation whose summary, key or JQL contains `needle`
    pub fn fail_matching(&self, operation: &'static str, needle: &str, error: TrackerError) {
        self.push_rule(operation, Some(needle.to_string()), error, None);
    }

    /// Fail the next `times` calls of an operation
    pub fn fail_times(&self, operation: &'static str, times: usize, error: TrackerError) {
        self.push_rule(operation, None, error, Some(times));
    }

    /// Remove all failure rules
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    fn push_rule(
        &self,
        operation: &'static str,
        matching: Option<String>,
        error: TrackerError,
        remaining: Option<usize>,
    ) {
        self.failures.lock().push(FailureRule {
            operation,
            matching,
            error,
            remaining,
        });
    }

    /// Put a ticket in place as if an earlier run created it
    pub fn seed_ticket(&self, fields: &TicketFields, status: &str) -> String {
        let key = self.insert(fields, None);
        self.set_status(&key, status);
        key
    }

    /// Put a sub-task in place under a parent
    pub fn seed_subtask(&self, parent: &str, fields: &TicketFields, status: &str) -> String {
        let key = self.insert(fields, Some(parent));
        self.set_status(&key, status);
        key
    }

    /// Force a ticket's status
    pub fn set_status(&self, key: &str, status: &str) {
        if let Some(mut stored) = self.tickets.get_mut(key) {
            stored.ticket.status = status.to_string();
        }
    }

    /// Ticket by key
    #[must_use]
    pub fn ticket(&self, key: &str) -> Option<Ticket> {
        self.tickets.get(key).map(|s| s.ticket.clone())
    }

    /// Fields last written to a ticket
    #[must_use]
    pub fn written_fields(&self, key: &str) -> Option<TicketFields> {
        self.tickets.get(key).map(|s| s.written.clone())
    }

    /// All tickets in creation order
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        let mut stored: Vec<StoredTicket> = self.tickets.iter().map(|e| e.value().clone()).collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.ticket).collect()
    }

    /// Tickets of one issue type in creation order
    #[must_use]
    pub fn tickets_of_type(&self, issue_type: &str) -> Vec<Ticket> {
        self.tickets()
            .into_iter()
            .filter(|t| t.issue_type == issue_type)
            .collect()
    }

    /// Every call so far
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of state-changing calls so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_write()).count()
    }

    /// Number of calls of one operation
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.name() == operation)
            .count()
    }

    fn insert(&self, fields: &TicketFields, parent: Option<&str>) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}-{seq}", fields.project_key);
        let ticket = Ticket {
            key: key.clone(),
            summary: fields.summary.clone(),
            status: "Open".to_string(),
            issue_type: fields.issue_type.clone(),
            parent: parent.map(str::to_string),
            fields: fields.custom.clone(),
            subtasks: Vec::new(),
        };
        self.tickets.insert(
            key.clone(),
            StoredTicket {
                ticket,
                project_key: fields.project_key.clone(),
                written: fields.clone(),
                seq,
            },
        );
        if let Some(parent) = parent {
            if let Some(mut stored) = self.tickets.get_mut(parent) {
                stored.ticket.subtasks.push(key.clone());
            }
        }
        key
    }

    /// Record a call and apply any matching failure rule
    fn enter(&self, call: Call) -> TrackerResult<()> {
        let failure = {
            let mut rules = self.failures.lock();
            let hit = rules.iter_mut().find(|rule| {
                rule.operation == call.name()
                    && rule
                        .matching
                        .as_deref()
                        .map_or(true, |needle| call.subject().contains(needle))
                    && rule.remaining != Some(0)
            });
            hit.map(|rule| {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                rule.error.clone()
            })
        };
        self.calls.lock().push(call);
        failure.map_or(Ok(()), Err)
    }

    fn matches(stored: &StoredTicket, query: &SearchQuery) -> bool {
        let ticket = &stored.ticket;
        if stored.project_key != query.project_key || ticket.issue_type != query.issue_type {
            return false;
        }
        if query.parent.is_some() && ticket.parent != query.parent {
            return false;
        }
        if let Some((field, value)) = &query.field_equals {
            let found = match ticket.fields.get(field) {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| value_text(item).is_some_and(|t| t.contains(value.as_str()))),
                Some(other) => value_text(other).is_some_and(|t| t.contains(value.as_str())),
                None => false,
            };
            if !found {
                return false;
            }
        }
        if let Some(text) = &query.summary_contains {
            if !ticket.summary.contains(text.as_str()) {
                return false;
            }
        }
        true
    }
}

fn value_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text),
        Value::Object(map) => map.get("value").and_then(Value::as_str),
        _ => None,
    }
}

/// Open -> In Progress -> Done, with reopen
#[must_use]
pub fn default_workflow() -> Vec<Transition> {
    vec![
        Transition::new("11", "Start Progress", "In Progress"),
        Transition::new("21", "Resolve", "Done"),
        Transition::new("31", "Reopen", "Open"),
    ]
}

#[async_trait::async_trait]
impl TicketClient for InMemoryTracker {
    async fn create_ticket(&self, fields: &TicketFields) -> TrackerResult<String> {
        self.enter(Call::CreateTicket {
            summary: fields.summary.clone(),
        })?;
        Ok(self.insert(fields, None))
    }

    async fn create_subtask(&self, parent: &str, fields: &TicketFields) -> TrackerResult<String> {
        self.enter(Call::CreateSubTask {
            parent: parent.to_string(),
            summary: fields.summary.clone(),
        })?;
        if !self.tickets.contains_key(parent) {
            return Err(TrackerError::NotFound(format!("issue {parent}")));
        }
        Ok(self.insert(fields, Some(parent)))
    }

    async fn update_fields(&self, key: &str, fields: &TicketFields) -> TrackerResult<()> {
        self.enter(Call::UpdateFields {
            key: key.to_string(),
        })?;
        let mut stored = self
            .tickets
            .get_mut(key)
            .ok_or_else(|| TrackerError::NotFound(format!("issue {key}")))?;
        stored.ticket.summary = fields.summary.clone();
        for (field, value) in &fields.custom {
            stored.ticket.fields.insert(field.clone(), value.clone());
        }
        stored.written = fields.clone();
        Ok(())
    }

    async fn search(&self, query: &SearchQuery, max_results: u32) -> TrackerResult<Vec<Ticket>> {
        self.enter(Call::Search {
            jql: query.to_jql(),
        })?;
        let mut found: Vec<StoredTicket> = self
            .tickets
            .iter()
            .filter(|e| Self::matches(e.value(), query))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|s| s.seq);
        Ok(found
            .into_iter()
            .take(max_results as usize)
            .map(|s| {
                let mut ticket = s.ticket;
                if !self.subtask_links {
                    ticket.subtasks.clear();
                }
                ticket
            })
            .collect())
    }

    async fn list_transitions(&self, key: &str) -> TrackerResult<Vec<Transition>> {
        self.enter(Call::ListTransitions {
            key: key.to_string(),
        })?;
        let status = self
            .tickets
            .get(key)
            .map(|s| s.ticket.status.clone())
            .ok_or_else(|| TrackerError::NotFound(format!("issue {key}")))?;
        Ok(self
            .workflow
            .lock()
            .iter()
            .filter(|t| !t.to_status.eq_ignore_ascii_case(&status))
            .cloned()
            .collect())
    }

    async fn apply_transition(&self, key: &str, transition_id: &str) -> TrackerResult<()> {
        self.enter(Call::ApplyTransition {
            key: key.to_string(),
            transition_id: transition_id.to_string(),
        })?;
        let target = self
            .workflow
            .lock()
            .iter()
            .find(|t| t.id == transition_id)
            .map(|t| t.to_status.clone())
            .ok_or_else(|| TrackerError::field("transition", format!("unknown transition {transition_id}")))?;
        let mut stored = self
            .tickets
            .get_mut(key)
            .ok_or_else(|| TrackerError::NotFound(format!("issue {key}")))?;
        stored.ticket.status = target;
        Ok(())
    }

    async fn list_fields(&self) -> TrackerResult<Vec<TrackerField>> {
        self.enter(Call::ListFields)?;
        Ok(self.catalog.lock().clone())
    }

    async fn field_options(
        &self,
        _project_key: &str,
        issue_type: &str,
    ) -> TrackerResult<HashMap<String, Vec<String>>> {
        self.enter(Call::FieldOptions {
            issue_type: issue_type.to_string(),
        })?;
        Ok(self.options.lock().clone())
    }
}
