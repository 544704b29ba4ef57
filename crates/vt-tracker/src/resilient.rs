//! Retrying client wrapper
//!
//! [`ResilientClient`] decorates any [`TicketClient`] with a [`RetryPolicy`]
//! and a [`Throttle`] shared by every clone, so one run has one backoff state.

use crate::client::TicketClient;
use crate::error::TrackerResult;
use crate::retry::RetryPolicy;
use crate::throttle::Throttle;
use crate::types::{SearchQuery, Ticket, TicketFields, TrackerField, Transition};
use std::collections::HashMap;
use std::sync::Arc;

/// Ticket client with retry, backoff and a shared throttle
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<dyn TicketClient>,
    policy: RetryPolicy,
    throttle: Arc<Throttle>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("policy", &self.policy)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Wrap a client
    #[must_use]
    pub fn new(inner: Arc<dyn TicketClient>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            throttle: Arc::new(Throttle::new()),
        }
    }

    /// Share an existing throttle
    #[inline]
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// The shared throttle
    #[inline]
    #[must_use]
    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    /// The retry policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait::async_trait]
impl TicketClient for ResilientClient {
    async fn create_ticket(&self, fields: &TicketFields) -> TrackerResult<String> {
        self.policy
            .execute("create_ticket", &self.throttle, || self.inner.create_ticket(fields))
            .await
    }

    async fn create_subtask(&self, parent: &str, fields: &TicketFields) -> TrackerResult<String> {
        self.policy
            .execute("create_subtask", &self.throttle, || {
                self.inner.create_subtask(parent, fields)
            })
            .await
    }

    async fn update_fields(&self, key: &str, fields: &TicketFields) -> TrackerResult<()> {
        self.policy
            .execute("update_fields", &self.throttle, || self.inner.update_fields(key, fields))
            .await
    }

    async fn search(&self, query: &SearchQuery, max_results: u32) -> TrackerResult<Vec<Ticket>> {
        self.policy
            .execute("search", &self.throttle, || self.inner.search(query, max_results))
            .await
    }

    async fn list_transitions(&self, key: &str) -> TrackerResult<Vec<Transition>> {
        self.policy
            .execute("list_transitions", &self.throttle, || self.inner.list_transitions(key))
            .await
    }

    async fn apply_transition(&self, key: &str, transition_id: &str) -> TrackerResult<()> {
        self.policy
            .execute("apply_transition", &self.throttle, || {
                self.inner.apply_transition(key, transition_id)
            })
            .await
    }

    async fn list_fields(&self) -> TrackerResult<Vec<TrackerField>> {
        self.policy
            .execute("list_fields", &self.throttle, || self.inner.list_fields())
            .await
    }

    async fn field_options(
        &self,
        project_key: &str,
        issue_type: &str,
    ) -> TrackerResult<HashMap<String, Vec<String>>> {
        self.policy
            .execute("field_options", &self.throttle, || {
                self.inner.field_options(project_key, issue_type)
            })
            .await
    }
}
