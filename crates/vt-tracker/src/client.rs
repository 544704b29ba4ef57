//! Ticket client boundary
//!
//! The only seam through which reconciliation touches the tracker. Writes
//! (`create_*`, `update_fields`, `apply_transition`) are skipped entirely in
//! dry-run mode; reads always execute.

use crate::error::TrackerResult;
use crate::types::{SearchQuery, Ticket, TicketFields, TrackerField, Transition};
use std::collections::HashMap;

/// Transport operations against an issue tracker
#[async_trait::async_trait]
pub trait TicketClient: Send + Sync {
    /// Create a ticket, returning its key
    async fn create_ticket(&self, fields: &TicketFields) -> TrackerResult<String>;

    /// Create a sub-task under `parent`, returning its key
    async fn create_subtask(&self, parent: &str, fields: &TicketFields) -> TrackerResult<String>;

    /// Overwrite summary, description and custom fields of a ticket
    async fn update_fields(&self, key: &str, fields: &TicketFields) -> TrackerResult<()>;

    /// Search tickets, reading at most `max_results`
    async fn search(&self, query: &SearchQuery, max_results: u32) -> TrackerResult<Vec<Ticket>>;

    /// Transitions currently available on a ticket
    async fn list_transitions(&self, key: &str) -> TrackerResult<Vec<Transition>>;

    /// Apply a transition by id
    async fn apply_transition(&self, key: &str, transition_id: &str) -> TrackerResult<()>;

    /// Field catalog
    async fn list_fields(&self) -> TrackerResult<Vec<TrackerField>>;

    /// Allowed option values per field id for a project and issue type
    ///
    /// Trackers that cannot report options return an empty map.
    async fn field_options(
        &self,
        _project_key: &str,
        _issue_type: &str,
    ) -> TrackerResult<HashMap<String, Vec<String>>> {
        Ok(HashMap::new())
    }
}
