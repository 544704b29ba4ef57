//! Ticket planning
//!
//! Pure functions from (violations, configuration, observed tracker state) to
//! an ordered list of [`PlannedOperation`]s:
//! - filter by policy-name prefix, then collapse duplicate violation ids
//! - group by violation id or component, in first-seen order
//! - order members by severity descending, then violation id
//! - emit create / update / sub-task / transition operations per group

use crate::dedup::ExistingTickets;
use crate::error::MappingError;
use crate::fields::{AttributeSource, FieldMappingResolver};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use vt_model::{
    AggregationMode, Attribute, AttributeValue, ComponentIdentifier, NotificationConfig, Violation,
};
use vt_tracker::TicketFields;

/// Longest summary the tracker accepts
const MAX_SUMMARY_CHARS: usize = 255;

/// Summary marker identifying a managed ticket
#[inline]
#[must_use]
pub fn key_marker(key: &str) -> String {
    format!("[{key}]")
}

/// Violations mapped to a single ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationGroup {
    /// Violation id (individual mode) or component key
    pub key: String,
    pub component: ComponentIdentifier,
    /// Ordered by severity descending, then violation id
    pub members: Vec<Violation>,
}

impl AggregationGroup {
    /// Highest member severity
    #[must_use]
    pub fn max_severity(&self) -> i64 {
        self.members.iter().map(|v| v.severity).max().unwrap_or_default()
    }

    /// Highest member CVSS score
    #[must_use]
    pub fn max_cvss(&self) -> Option<f64> {
        self.members
            .iter()
            .filter_map(|v| v.cvss_score)
            .fold(None, |max, s| Some(max.map_or(s, |m: f64| m.max(s))))
    }

    /// Highest member threat level
    #[must_use]
    pub fn max_threat_level(&self) -> i64 {
        self.members.iter().map(|v| v.threat_level).max().unwrap_or_default()
    }

    /// Member violation ids, in member order
    #[must_use]
    pub fn violation_ids(&self) -> Vec<&str> {
        self.members.iter().map(|v| v.violation_id.as_str()).collect()
    }

    fn distinct<F>(&self, f: F) -> Option<AttributeValue>
    where
        F: Fn(&Violation) -> Vec<String>,
    {
        let mut seen = Vec::new();
        for value in self.members.iter().flat_map(f) {
            if !value.trim().is_empty() && !seen.contains(&value) {
                seen.push(value);
            }
        }
        (!seen.is_empty()).then_some(AttributeValue::List(seen))
    }

    fn date<F>(&self, f: F, latest: bool) -> Option<AttributeValue>
    where
        F: Fn(&Violation) -> Option<DateTime<Utc>>,
    {
        let dates = self.members.iter().filter_map(f);
        let chosen = if latest { dates.max() } else { dates.min() };
        chosen.map(AttributeValue::Date)
    }
}

impl AttributeSource for AggregationGroup {
    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        if let [single] = self.members.as_slice() {
            return single.attribute(attribute);
        }
        match attribute {
            Attribute::Severity => Some(AttributeValue::Integer(self.max_severity())),
            Attribute::CvssScore => self.max_cvss().map(AttributeValue::Number),
            Attribute::ThreatLevel => Some(AttributeValue::Integer(self.max_threat_level())),
            Attribute::ViolationId => self.distinct(|v| vec![v.violation_id.clone()]),
            Attribute::PolicyName => self.distinct(|v| vec![v.policy_name.clone()]),
            Attribute::CveCode => self.distinct(|v| v.cve_code.clone().into_iter().collect()),
            Attribute::Licenses => self.distinct(Violation::licenses),
            Attribute::FileOccurrences => self.distinct(|v| v.file_occurrences.clone()),
            Attribute::DetectedDate => self.date(|v| v.detected_date, false),
            Attribute::LastScanDate => self.date(|v| v.last_scan_date, true),
            Attribute::Component => Some(AttributeValue::Text(self.component.key())),
            Attribute::ScanStage | Attribute::Remediation => self
                .members
                .iter()
                .find_map(|v| v.attribute(attribute)),
            Attribute::Application | Attribute::Organization => None,
        }
    }
}

/// Why a violation was left out of every group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Policy name does not start with the filter prefix
    PolicyFiltered { policy: String },
    /// An earlier accepted violation with the same id was kept
    DuplicateViolation,
}

/// Violation excluded before grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedViolation {
    pub violation_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of filtering and grouping
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Grouping {
    pub groups: Vec<AggregationGroup>,
    pub skipped: Vec<SkippedViolation>,
}

/// Reference to a parent ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketRef {
    /// Ticket found by the dedup query
    Existing(String),
    /// Parent created earlier in the same group
    PendingParent,
}

/// Kind of planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    CreateTicket,
    CreateSubTask { parent: TicketRef },
    UpdateTicket { ticket: String },
    TransitionTicket { ticket: String, target_status: String },
    Skip { reason: String },
}

impl OperationKind {
    /// Whether the operation writes to the tracker
    #[inline]
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::Skip { .. })
    }

    /// Whether the operation creates a ticket or sub-task
    #[inline]
    #[must_use]
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateTicket | OperationKind::CreateSubTask { .. }
        )
    }

    /// Short name used in logs and reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CreateTicket => "create_ticket",
            OperationKind::CreateSubTask { .. } => "create_subtask",
            OperationKind::UpdateTicket { .. } => "update_ticket",
            OperationKind::TransitionTicket { .. } => "transition_ticket",
            OperationKind::Skip { .. } => "skip",
        }
    }
}

/// One step of a group's plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedOperation {
    pub group_key: String,
    /// Violation the operation is about (sub-tasks and individual tickets)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_id: Option<String>,
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Resolved fields for creates and updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TicketFields>,
}

/// Operations for one group, plus the field values that had to be dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPlan {
    pub operations: Vec<PlannedOperation>,
    pub mapping_errors: Vec<MappingError>,
}

/// Groups violations and plans ticket operations
#[derive(Debug, Clone, Copy)]
pub struct TicketPlanner<'a> {
    config: &'a NotificationConfig,
    resolver: &'a FieldMappingResolver,
}

impl<'a> TicketPlanner<'a> {
    /// Create planner
    #[inline]
    #[must_use]
    pub fn new(config: &'a NotificationConfig, resolver: &'a FieldMappingResolver) -> Self {
        Self { config, resolver }
    }

    /// Active aggregation mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> AggregationMode {
        self.config.aggregation_mode()
    }

    /// Whether a policy passes the prefix filter
    #[inline]
    #[must_use]
    pub fn accepts(&self, policy_name: &str) -> bool {
        policy_name.starts_with(&self.config.policy_filter_prefix)
    }

    /// Group key of a violation under the active mode
    #[must_use]
    pub fn group_key(&self, violation: &Violation) -> String {
        if self.mode().is_aggregated() {
            violation.component.key()
        } else {
            violation.violation_id.clone()
        }
    }

    /// Filter, de-duplicate and group violations
    #[must_use]
    pub fn partition(&self, violations: &[Violation]) -> Grouping {
        let mut seen: HashSet<&str> = HashSet::with_capacity(violations.len());
        let mut skipped = Vec::new();
        let mut groups: IndexMap<String, AggregationGroup> = IndexMap::new();

        for violation in violations {
            if !self.accepts(&violation.policy_name) {
                skipped.push(SkippedViolation {
                    violation_id: violation.violation_id.clone(),
                    reason: SkipReason::PolicyFiltered {
                        policy: violation.policy_name.clone(),
                    },
                });
                continue;
            }
            if !seen.insert(violation.violation_id.as_str()) {
                skipped.push(SkippedViolation {
                    violation_id: violation.violation_id.clone(),
                    reason: SkipReason::DuplicateViolation,
                });
                continue;
            }

            groups
                .entry(self.group_key(violation))
                .or_insert_with_key(|key| AggregationGroup {
                    key: key.clone(),
                    component: violation.component.clone(),
                    members: Vec::new(),
                })
                .members
                .push(violation.clone());
        }

        let groups = groups
            .into_values()
            .map(|mut group| {
                group.members.sort_by(|a, b| {
                    b.severity
                        .cmp(&a.severity)
                        .then_with(|| a.violation_id.cmp(&b.violation_id))
                });
                group
            })
            .collect();

        Grouping { groups, skipped }
    }

    /// Plan the operations for one group
    #[must_use]
    pub fn plan_group(&self, group: &AggregationGroup, existing: &ExistingTickets) -> GroupPlan {
        let mut plan = GroupPlan::default();
        let individual = !self.mode().is_aggregated();
        let violation_id = individual.then(|| group.key.clone());

        let (fields, mut errors) = self.parent_fields(group);
        plan.mapping_errors.append(&mut errors);

        match &existing.parent {
            Some(ticket) => {
                plan.operations.push(PlannedOperation {
                    group_key: group.key.clone(),
                    violation_id: violation_id.clone(),
                    kind: OperationKind::UpdateTicket {
                        ticket: ticket.key.clone(),
                    },
                    payload: Some(fields),
                });
                if let Some(operation) = self.transition_for(group, &ticket.key, &ticket.status) {
                    plan.operations.push(PlannedOperation {
                        violation_id: violation_id.clone(),
                        ..operation
                    });
                }
            }
            None => plan.operations.push(PlannedOperation {
                group_key: group.key.clone(),
                violation_id,
                kind: OperationKind::CreateTicket,
                payload: Some(fields),
            }),
        }

        if self.mode().uses_subtasks() {
            for member in &group.members {
                let kind = match existing.subtasks.get(&member.violation_id) {
                    Some(subtask) => OperationKind::UpdateTicket {
                        ticket: subtask.key.clone(),
                    },
                    None if !existing.subtasks_known() => {
                        plan.operations.push(PlannedOperation {
                            group_key: group.key.clone(),
                            violation_id: Some(member.violation_id.clone()),
                            kind: OperationKind::Skip {
                                reason: "existing sub-tasks could not be listed".to_string(),
                            },
                            payload: None,
                        });
                        continue;
                    }
                    None => OperationKind::CreateSubTask {
                        parent: existing
                            .parent
                            .as_ref()
                            .map_or(TicketRef::PendingParent, |p| TicketRef::Existing(p.key.clone())),
                    },
                };
                let (fields, mut errors) = self.subtask_fields(member);
                plan.mapping_errors.append(&mut errors);
                plan.operations.push(PlannedOperation {
                    group_key: group.key.clone(),
                    violation_id: Some(member.violation_id.clone()),
                    kind,
                    payload: Some(fields),
                });
            }
        }

        plan
    }

    fn transition_for(
        &self,
        group: &AggregationGroup,
        ticket: &str,
        current_status: &str,
    ) -> Option<PlannedOperation> {
        let transition = &self.config.transition;
        if !transition.enabled {
            return None;
        }
        let target = transition
            .target_status
            .as_deref()
            .or(transition.transition_name.as_deref())?;

        let already_there = transition
            .target_status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case(current_status.trim()));
        let kind = if already_there {
            OperationKind::Skip {
                reason: format!("{ticket} already in status `{current_status}`"),
            }
        } else {
            OperationKind::TransitionTicket {
                ticket: ticket.to_string(),
                target_status: target.to_string(),
            }
        };

        Some(PlannedOperation {
            group_key: group.key.clone(),
            violation_id: None,
            kind,
            payload: None,
        })
    }

    /// Fields of the group's ticket
    #[must_use]
    pub fn parent_fields(&self, group: &AggregationGroup) -> (TicketFields, Vec<MappingError>) {
        let component = group.component.display_name();
        let (summary, description) = match (self.mode().is_aggregated(), group.members.as_slice()) {
            (false, [violation]) => (
                summary(
                    &format!("{} policy violation in {component}", violation.policy_name),
                    &group.key,
                ),
                self.describe_violation(violation),
            ),
            _ => (
                summary(&format!("Policy violations in {component}"), &group.key),
                self.describe_group(group),
            ),
        };

        let (custom, errors) = self.resolver.resolve(group);
        let fields = TicketFields {
            project_key: self.config.project_key.clone(),
            issue_type: self.config.issue_type.clone(),
            summary,
            description,
            priority: self.config.priority.clone(),
            custom,
        };
        (fields, errors)
    }

    /// Fields of a violation's sub-task
    #[must_use]
    pub fn subtask_fields(&self, violation: &Violation) -> (TicketFields, Vec<MappingError>) {
        let (custom, errors) = self.resolver.resolve(violation);
        let fields = TicketFields {
            project_key: self.config.project_key.clone(),
            issue_type: self.config.sub_task_issue_type.clone(),
            summary: summary(
                &format!("{} policy violation", violation.policy_name),
                &violation.violation_id,
            ),
            description: self.describe_violation(violation),
            priority: self.config.priority.clone(),
            custom,
        };
        (fields, errors)
    }

    fn describe_violation(&self, violation: &Violation) -> String {
        let mut lines = vec![
            format!("Component: {}", violation.component.key()),
            format!("Policy: {} (threat level {})", violation.policy_name, violation.threat_level),
            format!("Severity: {}", violation.severity),
        ];
        if let Some(cve) = &violation.cve_code {
            match violation.cvss_score {
                Some(score) => lines.push(format!("Vulnerability: {cve} (CVSS {score})")),
                None => lines.push(format!("Vulnerability: {cve}")),
            }
        }
        if let Some(reason) = &violation.reason {
            lines.push(format!("Reason: {reason}"));
        }
        let licenses = violation.licenses();
        if !licenses.is_empty() {
            lines.push(format!("Licenses: {}", licenses.join(", ")));
        }
        if let Some(remediation) = &violation.recommended_remediation {
            lines.push(format!("Recommended remediation: {remediation}"));
        }
        if let Some(detected) = violation.detected_date {
            lines.push(format!("Detected: {}", detected.format("%Y-%m-%d")));
        }
        self.push_context(&mut lines);
        lines.join("\n")
    }

    fn describe_group(&self, group: &AggregationGroup) -> String {
        let mut lines = vec![
            format!("Component: {}", group.component.key()),
            format!("Violations: {}", group.members.len()),
            format!("Highest severity: {}", group.max_severity()),
            format!("Highest threat level: {}", group.max_threat_level()),
        ];
        if let Some(score) = group.max_cvss() {
            lines.push(format!("Highest CVSS: {score}"));
        }
        self.push_context(&mut lines);
        lines.push(String::new());
        for member in &group.members {
            let cve = member
                .cve_code
                .as_deref()
                .map(|c| format!(", {c}"))
                .unwrap_or_default();
            lines.push(format!(
                "* {} {} (severity {}{cve})",
                member.violation_id, member.policy_name, member.severity
            ));
        }
        lines.join("\n")
    }

    fn push_context(&self, lines: &mut Vec<String>) {
        let app = &self.config.application;
        if let Some(name) = &app.application_name {
            lines.push(format!("Application: {name}"));
        }
        if let Some(org) = &app.organization_name {
            lines.push(format!("Organization: {org}"));
        }
    }
}

/// Summary text ending in the key marker, truncated to the tracker limit
///
/// A marker that alone reaches the limit is cut as well; such tickets can
/// only be found again through the key field.
fn summary(text: &str, key: &str) -> String {
    let marker = key_marker(key);
    let marker_chars = marker.chars().count();
    if marker_chars >= MAX_SUMMARY_CHARS {
        return marker.chars().take(MAX_SUMMARY_CHARS).collect();
    }
    let budget = MAX_SUMMARY_CHARS - marker_chars - 1;
    let text: String = text.chars().take(budget).collect();
    let text = text.trim();
    if text.is_empty() {
        marker
    } else {
        format!("{text} {marker}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vt_tracker::Ticket;

    fn v(id: &str, policy: &str, component: &str, severity: i64) -> Violation {
        Violation::new(id, policy, ComponentIdentifier::from_purl(component)).with_severity(severity)
    }

    fn ticket(key: &str, status: &str) -> Ticket {
        Ticket {
            key: key.into(),
            summary: String::new(),
            status: status.into(),
            issue_type: "Bug".into(),
            parent: None,
            fields: Default::default(),
            subtasks: Vec::new(),
        }
    }

    fn planner_for(config: &NotificationConfig) -> (NotificationConfig, FieldMappingResolver) {
        (config.clone(), FieldMappingResolver::empty(config))
    }

    #[test]
    fn filter_and_duplicates_are_skipped() {
        let config = NotificationConfig::new("SEC").with_policy_filter("CM-");
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);

        let grouping = planner.partition(&[
            v("1", "CM-Security", "a", 5),
            v("2", "License", "a", 5),
            v("1", "CM-Security", "b", 9),
        ]);

        assert_eq!(grouping.groups.len(), 1);
        assert_eq!(
            grouping.skipped,
            vec![
                SkippedViolation {
                    violation_id: "2".into(),
                    reason: SkipReason::PolicyFiltered {
                        policy: "License".into()
                    },
                },
                SkippedViolation {
                    violation_id: "1".into(),
                    reason: SkipReason::DuplicateViolation,
                },
            ]
        );
    }

    #[test]
    fn members_ordered_by_severity_then_id() {
        let config = NotificationConfig::new("SEC").with_aggregation(AggregationMode::ByComponent);
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);

        let grouping = planner.partition(&[
            v("b", "CM-1", "lib", 4),
            v("c", "CM-1", "lib", 9),
            v("a", "CM-1", "lib", 4),
        ]);
        assert_eq!(grouping.groups[0].violation_ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn group_aggregates_are_independent_maxima() {
        let group = AggregationGroup {
            key: "lib".into(),
            component: ComponentIdentifier::from_purl("lib"),
            members: vec![
                v("1", "p", "lib", 9).with_threat_level(2).with_cve("CVE-1", 4.0),
                v("2", "p", "lib", 3).with_threat_level(8).with_cve("CVE-2", 7.5),
            ],
        };
        assert_eq!(group.max_severity(), 9);
        assert_eq!(group.max_threat_level(), 8);
        assert_eq!(group.max_cvss(), Some(7.5));
        assert_eq!(
            group.attribute(Attribute::CveCode),
            Some(AttributeValue::List(vec!["CVE-1".into(), "CVE-2".into()]))
        );
    }

    #[test]
    fn new_group_creates_ticket() {
        let config = NotificationConfig::new("SEC");
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping = planner.partition(&[v("v-1", "CM-Security", "pkg:npm/a@1", 7)]);

        let plan = planner.plan_group(&grouping.groups[0], &ExistingTickets::default());
        assert_eq!(plan.operations.len(), 1);
        let op = &plan.operations[0];
        assert_eq!(op.kind, OperationKind::CreateTicket);
        assert_eq!(op.violation_id.as_deref(), Some("v-1"));
        let payload = op.payload.as_ref().unwrap();
        assert_eq!(payload.summary, "CM-Security policy violation in pkg:npm/a@1 [v-1]");
        assert_eq!(payload.issue_type, "Bug");
    }

    #[test]
    fn existing_ticket_updated_and_transitioned() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponent)
            .with_transition_to("In Progress");
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping = planner.partition(&[v("1", "CM-1", "lib-a", 9)]);

        let existing = ExistingTickets {
            parent: Some(ticket("SEC-1", "Open")),
            ..ExistingTickets::default()
        };
        let kinds: Vec<OperationKind> = planner
            .plan_group(&grouping.groups[0], &existing)
            .operations
            .into_iter()
            .map(|o| o.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::UpdateTicket {
                    ticket: "SEC-1".into()
                },
                OperationKind::TransitionTicket {
                    ticket: "SEC-1".into(),
                    target_status: "In Progress".into()
                },
            ]
        );
    }

    #[test]
    fn no_transition_when_already_in_target_status() {
        let config = NotificationConfig::new("SEC").with_transition_to("In Progress");
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping = planner.partition(&[v("1", "CM-1", "lib-a", 9)]);

        let existing = ExistingTickets {
            parent: Some(ticket("SEC-1", "in progress")),
            ..ExistingTickets::default()
        };
        let plan = planner.plan_group(&grouping.groups[0], &existing);
        assert!(matches!(plan.operations[1].kind, OperationKind::Skip { .. }));
        assert!(plan.operations.iter().all(|o| !matches!(
            o.kind,
            OperationKind::TransitionTicket { .. }
        )));
    }

    #[test]
    fn subtasks_matched_by_violation_id() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponentWithSubtasks);
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping =
            planner.partition(&[v("1", "CM-1", "lib-a", 9), v("2", "CM-1", "lib-a", 3)]);

        let mut existing = ExistingTickets {
            parent: Some(ticket("SEC-1", "Open")),
            ..ExistingTickets::default()
        };
        existing.subtasks.insert("1".into(), ticket("SEC-2", "Open"));

        let plan = planner.plan_group(&grouping.groups[0], &existing);
        let kinds: Vec<&OperationKind> = plan.operations.iter().map(|o| &o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &OperationKind::UpdateTicket {
                    ticket: "SEC-1".into()
                },
                &OperationKind::UpdateTicket {
                    ticket: "SEC-2".into()
                },
                &OperationKind::CreateSubTask {
                    parent: TicketRef::Existing("SEC-1".into())
                },
            ]
        );
        let subtask = plan.operations[2].payload.as_ref().unwrap();
        assert_eq!(subtask.issue_type, "Sub-task");
        assert!(subtask.summary.ends_with("[2]"));
    }

    #[test]
    fn new_parent_subtasks_reference_pending_parent() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponentWithSubtasks);
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping = planner.partition(&[v("1", "CM-1", "lib-a", 9)]);

        let plan = planner.plan_group(&grouping.groups[0], &ExistingTickets::default());
        assert_eq!(plan.operations[0].kind, OperationKind::CreateTicket);
        assert_eq!(
            plan.operations[1].kind,
            OperationKind::CreateSubTask {
                parent: TicketRef::PendingParent
            }
        );
    }

    #[test]
    fn filtered_violation_does_not_shadow_accepted_duplicate() {
        let config = NotificationConfig::new("SEC").with_policy_filter("CM-");
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);

        let grouping = planner.partition(&[v("1", "License", "a", 5), v("1", "CM-Security", "a", 7)]);

        assert_eq!(grouping.groups.len(), 1);
        assert_eq!(grouping.groups[0].members[0].policy_name, "CM-Security");
        assert_eq!(
            grouping.skipped,
            vec![SkippedViolation {
                violation_id: "1".into(),
                reason: SkipReason::PolicyFiltered {
                    policy: "License".into()
                },
            }]
        );
    }

    #[test]
    fn unlisted_subtasks_are_skipped_not_recreated() {
        let config = NotificationConfig::new("SEC")
            .with_aggregation(AggregationMode::ByComponentWithSubtasks);
        let (config, resolver) = planner_for(&config);
        let planner = TicketPlanner::new(&config, &resolver);
        let grouping =
            planner.partition(&[v("1", "CM-1", "lib-a", 9), v("2", "CM-1", "lib-a", 3)]);

        let mut existing = ExistingTickets {
            parent: Some(ticket("SEC-1", "Open")),
            subtask_search_error: Some("network error".into()),
            ..ExistingTickets::default()
        };
        existing.subtasks.insert("1".into(), ticket("SEC-2", "Open"));

        let plan = planner.plan_group(&grouping.groups[0], &existing);
        let kinds: Vec<&OperationKind> = plan.operations.iter().map(|o| &o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &OperationKind::UpdateTicket {
                    ticket: "SEC-1".into()
                },
                &OperationKind::UpdateTicket {
                    ticket: "SEC-2".into()
                },
                &OperationKind::Skip {
                    reason: "existing sub-tasks could not be listed".into()
                },
            ]
        );
        assert!(plan.operations.iter().all(|o| !o.kind.is_create()));
    }

    #[test]
    fn oversized_key_still_within_limit() {
        let key = "k".repeat(300);
        let s = summary("Policy violations in lib", &key);
        assert_eq!(s.chars().count(), MAX_SUMMARY_CHARS);
        assert!(s.starts_with('['));

        let s = summary("Policy violations in lib", &"k".repeat(252));
        assert_eq!(s.chars().count(), MAX_SUMMARY_CHARS - 1);
        assert_eq!(s, key_marker(&"k".repeat(252)));
    }

    #[test]
    fn summary_keeps_marker_when_truncated() {
        let long = "x".repeat(400);
        let s = summary(&long, "pkg:npm/a@1");
        assert_eq!(s.chars().count(), MAX_SUMMARY_CHARS);
        assert!(s.ends_with("[pkg:npm/a@1]"));
    }
}
