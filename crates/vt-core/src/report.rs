//! Run report
//!
//! Everything a run did or would do, returned to the caller. Counters only
//! grow as group outcomes are merged in; nothing recorded is ever removed.

use crate::planner::{OperationKind, PlannedOperation, SkippedViolation};
use serde::Serialize;

/// Category of a non-fatal problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Field value dropped from a payload
    Mapping,
    /// Dedup search failed; the group was treated as new
    Query,
    /// Create or update failed
    Write,
    /// No transition reaches the target
    TransitionNotFound,
    /// Several transitions reach the target
    TransitionAmbiguous,
    /// Transition call failed
    Transition,
}

/// Non-fatal problem recorded against a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunIssue {
    pub group_key: String,
    /// Operation name, when the problem belongs to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<&'static str>,
    pub kind: IssueKind,
    pub message: String,
}

impl RunIssue {
    /// Create issue
    #[inline]
    #[must_use]
    pub fn new(group_key: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            operation: None,
            kind,
            message: message.into(),
        }
    }

    /// With operation name
    #[inline]
    #[must_use]
    pub fn for_operation(mut self, operation: &OperationKind) -> Self {
        self.operation = Some(operation.name());
        self
    }
}

/// How a planned operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Written to the tracker
    Applied,
    /// Counted as successful without writing
    DryRun,
    /// Tracker call failed
    Failed,
    /// Not attempted (skip operation, or its parent failed)
    NotAttempted,
}

impl OperationStatus {
    /// Applied, or would have been
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Applied | Self::DryRun)
    }
}

/// Planned operation with its outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    #[serde(flatten)]
    pub operation: PlannedOperation,
    pub status: OperationStatus,
    /// Ticket key written, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

/// Outcome of one group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOutcome {
    pub records: Vec<OperationRecord>,
    pub issues: Vec<RunIssue>,
}

impl GroupOutcome {
    /// Record an operation outcome
    pub fn record(&mut self, operation: PlannedOperation, status: OperationStatus, ticket: Option<String>) {
        self.records.push(OperationRecord {
            operation,
            status,
            ticket,
        });
    }

    /// Record an issue
    pub fn issue(&mut self, issue: RunIssue) {
        self.issues.push(issue);
    }
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    /// Groups processed
    pub groups: usize,
    /// Tickets and sub-tasks created
    pub created: usize,
    pub updated: usize,
    pub transitioned: usize,
    /// Skip operations
    pub skipped: usize,
    /// Most groups processed at once
    pub peak_workers: usize,
    /// Violations left out before grouping
    pub skipped_violations: Vec<SkippedViolation>,
    pub issues: Vec<RunIssue>,
    pub operations: Vec<OperationRecord>,
}

impl RunReport {
    /// Empty report
    #[inline]
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Merge one group's outcome
    pub fn merge(&mut self, outcome: GroupOutcome) {
        self.groups += 1;
        for record in &outcome.records {
            let succeeded = record.status.succeeded();
            match &record.operation.kind {
                OperationKind::CreateTicket | OperationKind::CreateSubTask { .. } if succeeded => {
                    self.created += 1;
                }
                OperationKind::UpdateTicket { .. } if succeeded => self.updated += 1,
                OperationKind::TransitionTicket { .. } if succeeded => self.transitioned += 1,
                OperationKind::Skip { .. } => self.skipped += 1,
                _ => {}
            }
        }
        self.operations.extend(outcome.records);
        self.issues.extend(outcome.issues);
    }

    /// Planned operations, in execution order
    pub fn planned(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter().map(|r| &r.operation)
    }

    /// Issues of one kind
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &RunIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Whether any create or update failed
    #[must_use]
    pub fn has_write_errors(&self) -> bool {
        self.issues.iter().any(|i| i.kind == IssueKind::Write)
    }

    /// Count of operations of a given kind name
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.operations
            .iter()
            .filter(|r| r.operation.kind.name() == operation)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OperationKind) -> PlannedOperation {
        PlannedOperation {
            group_key: "g".into(),
            violation_id: None,
            kind,
            payload: None,
        }
    }

    #[test]
    fn merge_counts_successful_operations() {
        let mut outcome = GroupOutcome::default();
        outcome.record(op(OperationKind::CreateTicket), OperationStatus::Applied, Some("SEC-1".into()));
        outcome.record(
            op(OperationKind::UpdateTicket { ticket: "SEC-2".into() }),
            OperationStatus::Failed,
            None,
        );
        outcome.issue(RunIssue::new("g", IssueKind::Write, "boom"));

        let mut report = RunReport::new(false);
        report.merge(outcome);

        assert_eq!(report.groups, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 0);
        assert!(report.has_write_errors());
        assert_eq!(report.count("update_ticket"), 1);
    }

    #[test]
    fn dry_run_counts_as_success() {
        let mut outcome = GroupOutcome::default();
        outcome.record(
            op(OperationKind::TransitionTicket {
                ticket: "SEC-1".into(),
                target_status: "Done".into(),
            }),
            OperationStatus::DryRun,
            Some("SEC-1".into()),
        );
        let mut report = RunReport::new(true);
        report.merge(outcome);
        assert_eq!(report.transitioned, 1);
        assert!(!report.has_write_errors());
    }

    #[test]
    fn serializes_flat_operation_records() {
        let mut outcome = GroupOutcome::default();
        outcome.record(op(OperationKind::CreateTicket), OperationStatus::DryRun, None);
        let mut report = RunReport::new(true);
        report.merge(outcome);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["operations"][0]["kind"], "create_ticket");
        assert_eq!(value["operations"][0]["status"], "dry_run");
        assert_eq!(value["operations"][0]["group_key"], "g");
    }
}
