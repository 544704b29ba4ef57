//! Existing-ticket discovery
//!
//! Before any write, each group searches the tracker for the ticket it would
//! otherwise create:
//! - scoped to project and issue type
//! - narrowed by the custom field carrying the group key, or by the summary
//!   key marker when no such field is mapped
//! - always post-filtered locally, so a loose query never matches the wrong
//!   ticket

use crate::fields::{FieldMapping, FieldMappingResolver};
use crate::planner::{key_marker, AggregationGroup};
use std::collections::HashMap;
use tracing::{debug, warn};
use vt_model::{Attribute, NotificationConfig};
use vt_tracker::{SearchQuery, Ticket, TicketClient, TrackerResult};

/// Tickets already present for a group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingTickets {
    /// Group ticket (parent in sub-task mode)
    pub parent: Option<Ticket>,
    /// Existing sub-tasks keyed by violation id
    pub subtasks: HashMap<String, Ticket>,
    /// Set when the parent was found but its sub-tasks could not be listed
    pub subtask_search_error: Option<String>,
}

impl ExistingTickets {
    /// Nothing found
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Parent ticket found
    #[inline]
    #[must_use]
    pub fn with_parent(parent: Ticket) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Whether sub-tasks missing from `subtasks` are known not to exist
    #[inline]
    #[must_use]
    pub fn subtasks_known(&self) -> bool {
        self.subtask_search_error.is_none()
    }
}

/// Builds and runs dedup searches for groups
#[derive(Debug, Clone, Copy)]
pub struct DeduplicationQuery<'a> {
    config: &'a NotificationConfig,
    resolver: &'a FieldMappingResolver,
}

impl<'a> DeduplicationQuery<'a> {
    /// Create query builder
    #[inline]
    #[must_use]
    pub fn new(config: &'a NotificationConfig, resolver: &'a FieldMappingResolver) -> Self {
        Self { config, resolver }
    }

    /// Field carrying the group key: violation id when tickets are individual,
    /// component when aggregated
    #[must_use]
    pub fn key_field(&self) -> Option<&'a FieldMapping> {
        let attribute = if self.config.aggregation_mode().is_aggregated() {
            Attribute::Component
        } else {
            Attribute::ViolationId
        };
        self.resolver.field_for(attribute)
    }

    /// Field carrying the violation id on sub-tasks
    #[must_use]
    pub fn subtask_key_field(&self) -> Option<&'a FieldMapping> {
        self.resolver.field_for(Attribute::ViolationId)
    }

    /// Search for a group's ticket
    #[must_use]
    pub fn group_query(&self, group_key: &str) -> SearchQuery {
        let query = SearchQuery::new(&self.config.project_key, &self.config.issue_type);
        let key_field = self.key_field();
        let query = match key_field {
            Some(field) if !self.config.disable_field_filter => {
                query.with_field(&field.field_id, group_key)
            }
            Some(_) => query,
            None => query.with_summary(key_marker(group_key)),
        };
        query.returning(key_field.map(|f| vec![f.field_id.clone()]).unwrap_or_default())
    }

    /// Search for the sub-tasks of a parent
    #[must_use]
    pub fn subtask_query(&self, parent_key: &str) -> SearchQuery {
        SearchQuery::new(&self.config.project_key, &self.config.sub_task_issue_type)
            .under_parent(parent_key)
            .returning(
                self.subtask_key_field()
                    .map(|f| vec![f.field_id.clone()])
                    .unwrap_or_default(),
            )
    }

    /// Search for the sub-task of one violation under a parent
    #[must_use]
    pub fn violation_subtask_query(&self, parent_key: &str, violation_id: &str) -> SearchQuery {
        let query = self.subtask_query(parent_key);
        match self.subtask_key_field() {
            Some(field) if !self.config.disable_field_filter => {
                query.with_field(&field.field_id, violation_id)
            }
            _ => query.with_summary(key_marker(violation_id)),
        }
    }

    /// Find the tickets already present for a group
    ///
    /// A failed sub-task search keeps the parent and is reported through
    /// [`ExistingTickets::subtask_search_error`].
    ///
    /// # Errors
    /// The tracker error of the group search.
    pub async fn find(
        &self,
        client: &dyn TicketClient,
        group: &AggregationGroup,
    ) -> TrackerResult<ExistingTickets> {
        let query = self.group_query(&group.key);
        let found = client.search(&query, self.config.max_query_results).await?;
        let mut matches = found
            .into_iter()
            .filter(|t| identifies(t, self.key_field(), &group.key));

        let Some(parent) = matches.next() else {
            debug!(group = %group.key, "no existing ticket");
            return Ok(ExistingTickets::none());
        };
        let extra: Vec<String> = matches.map(|t| t.key).collect();
        if !extra.is_empty() {
            warn!(
                group = %group.key,
                ticket = %parent.key,
                duplicates = ?extra,
                "several tickets match the group, using the oldest"
            );
        }
        debug!(group = %group.key, ticket = %parent.key, status = %parent.status, "found existing ticket");

        if !self.config.aggregation_mode().uses_subtasks() {
            return Ok(ExistingTickets::with_parent(parent));
        }
        let subtasks = self.find_subtasks(client, group, &parent).await;
        let mut existing = ExistingTickets::with_parent(parent);
        match subtasks {
            Ok(subtasks) => existing.subtasks = subtasks,
            Err(err) => {
                warn!(
                    group = %group.key,
                    error = %err,
                    "sub-task search failed, keeping the parent and creating no sub-tasks"
                );
                existing.subtask_search_error = Some(err.to_string());
            }
        }
        Ok(existing)
    }

    /// Existing sub-tasks of the group's members under `parent`
    ///
    /// The parent-scoped search reads at least as many results as the parent
    /// has linked sub-tasks. When the listing may still be incomplete, members
    /// it did not match are looked up one by one.
    async fn find_subtasks(
        &self,
        client: &dyn TicketClient,
        group: &AggregationGroup,
        parent: &Ticket,
    ) -> TrackerResult<HashMap<String, Ticket>> {
        let linked = u32::try_from(parent.subtasks.len()).unwrap_or(u32::MAX);
        let limit = self.config.max_query_results.max(linked).max(1);
        let found = client.search(&self.subtask_query(&parent.key), limit).await?;
        let complete = if parent.subtasks.is_empty() {
            found.len() < limit as usize
        } else {
            found.len() >= parent.subtasks.len()
        };

        let key_field = self.subtask_key_field();
        let mut subtasks = HashMap::new();
        let mut narrowed = 0usize;
        for member in &group.members {
            let id = member.violation_id.as_str();
            let mut ticket = found.iter().find(|t| identifies(t, key_field, id)).cloned();
            if ticket.is_none() && !complete {
                narrowed += 1;
                let query = self.violation_subtask_query(&parent.key, id);
                ticket = client
                    .search(&query, self.config.max_query_results)
                    .await?
                    .into_iter()
                    .find(|t| identifies(t, key_field, id));
            }
            if let Some(ticket) = ticket {
                subtasks.insert(id.to_string(), ticket);
            }
        }
        debug!(
            parent = %parent.key,
            found = found.len(),
            complete,
            narrowed,
            matched = subtasks.len(),
            "matched existing sub-tasks"
        );
        Ok(subtasks)
    }
}

/// Whether a ticket carries the given key in its key field or summary marker
fn identifies(ticket: &Ticket, key_field: Option<&FieldMapping>, key: &str) -> bool {
    let by_field = key_field
        .and_then(|field| ticket.field_text(&field.field_id))
        .is_some_and(|value| value.trim() == key);
    by_field || ticket.summary.contains(&key_marker(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_model::{AggregationMode, FieldMappingEntry};
    use vt_tracker::TrackerField;

    fn ticket(key: &str, summary: &str) -> Ticket {
        Ticket {
            key: key.into(),
            summary: summary.into(),
            status: "Open".into(),
            issue_type: "Bug".into(),
            parent: None,
            fields: Default::default(),
            subtasks: Vec::new(),
        }
    }

    fn resolver_with_component_field(config: &NotificationConfig) -> FieldMappingResolver {
        let catalog = [TrackerField::new("customfield_10100", "Component", "string")];
        FieldMappingResolver::build(config, &catalog, &HashMap::new()).unwrap()
    }

    #[test]
    fn summary_marker_used_without_key_field() {
        let config = NotificationConfig::new("SEC");
        let resolver = FieldMappingResolver::empty(&config);
        let query = DeduplicationQuery::new(&config, &resolver).group_query("v-1");

        assert_eq!(query.summary_contains.as_deref(), Some("[v-1]"));
        assert_eq!(query.field_equals, None);
        assert_eq!(query.issue_type, "Bug");
    }

    #[test]
    fn key_field_clause_in_aggregated_mode() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponent)
            .with_field(FieldMappingEntry::for_attribute("Component", Attribute::Component));
        let resolver = resolver_with_component_field(&config);
        let query = DeduplicationQuery::new(&config, &resolver).group_query("pkg:npm/a@1");

        assert_eq!(
            query.field_equals,
            Some(("customfield_10100".into(), "pkg:npm/a@1".into()))
        );
        assert_eq!(query.summary_contains, None);
        assert_eq!(query.fields, vec!["customfield_10100".to_string()]);
    }

    #[test]
    fn disabled_field_filter_drops_field_clause() {
        let mut config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponent)
            .with_field(FieldMappingEntry::for_attribute("Component", Attribute::Component));
        config.disable_field_filter = true;
        let resolver = resolver_with_component_field(&config);
        let query = DeduplicationQuery::new(&config, &resolver).group_query("pkg:npm/a@1");

        assert_eq!(query.field_equals, None);
        assert_eq!(query.summary_contains, None);
    }

    #[test]
    fn post_filter_matches_field_or_marker() {
        let field = FieldMapping {
            field_id: "customfield_1".into(),
            name: "Violation Id".into(),
            kind: crate::fields::FieldKind::Text,
            overridden: false,
            source: vt_model::FieldSource::Attribute(Attribute::ViolationId),
            options: Vec::new(),
        };
        let mut by_field = ticket("SEC-1", "unrelated");
        by_field
            .fields
            .insert("customfield_1".into(), serde_json::json!("v-1"));

        assert!(identifies(&by_field, Some(&field), "v-1"));
        assert!(identifies(&ticket("SEC-2", "CM policy violation [v-1]"), None, "v-1"));
        assert!(!identifies(&ticket("SEC-3", "CM policy violation [v-10]"), None, "v-1"));
    }

    #[test]
    fn subtask_query_scoped_to_parent() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponentWithSubtasks);
        let resolver = FieldMappingResolver::empty(&config);
        let query = DeduplicationQuery::new(&config, &resolver).subtask_query("SEC-7");

        assert_eq!(query.parent.as_deref(), Some("SEC-7"));
        assert_eq!(query.issue_type, "Sub-task");
    }

    #[test]
    fn single_subtask_lookup_narrows_by_marker() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponentWithSubtasks);
        let resolver = FieldMappingResolver::empty(&config);
        let query =
            DeduplicationQuery::new(&config, &resolver).violation_subtask_query("SEC-7", "v-3");

        assert_eq!(query.parent.as_deref(), Some("SEC-7"));
        assert_eq!(query.summary_contains.as_deref(), Some("[v-3]"));
        assert_eq!(query.field_equals, None);
    }
}
