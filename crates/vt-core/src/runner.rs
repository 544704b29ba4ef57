//! Reconciliation runner
//!
//! One run, start to finish:
//! 1. resolve field mappings against the tracker catalog (fatal on failure)
//! 2. filter and group violations
//! 3. per group, in a bounded pool: dedup search, plan, execute in order
//! 4. merge every group outcome into the [`RunReport`]
//!
//! After step 1 nothing is fatal: a failing group records its issues and
//! its siblings carry on.

use crate::dedup::{DeduplicationQuery, ExistingTickets};
use crate::error::{RunError, TransitionError};
use crate::fields::FieldMappingResolver;
use crate::planner::{AggregationGroup, OperationKind, PlannedOperation, TicketPlanner, TicketRef};
use crate::pool::WorkerPool;
use crate::report::{GroupOutcome, IssueKind, OperationStatus, RunIssue, RunReport};
use crate::transition::{TransitionEngine, TransitionOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vt_model::{CredentialsProvider, NotificationConfig, Violation};
use vt_tracker::{JiraClient, ResilientClient, RetryPolicy, TicketClient, TicketFields};

/// Runs reconciliation against one tracker
#[derive(Clone)]
pub struct ReconciliationRunner {
    client: Arc<dyn TicketClient>,
    config: NotificationConfig,
}

impl std::fmt::Debug for ReconciliationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationRunner")
            .field("project_key", &self.config.project_key)
            .field("mode", &self.config.aggregation_mode())
            .finish_non_exhaustive()
    }
}

/// Where a group's parent ticket stands while its operations execute
#[derive(Debug, Default)]
struct ParentState {
    key: Option<String>,
    failed: bool,
}

impl ReconciliationRunner {
    /// Create runner; the configuration is normalized and validated here
    ///
    /// # Errors
    /// `Config` when validation fails.
    pub fn new(client: Arc<dyn TicketClient>, mut config: NotificationConfig) -> Result<Self, RunError> {
        config.normalize();
        config.validate()?;
        Ok(Self { client, config })
    }

    /// Create runner talking to Jira through the retrying client
    ///
    /// # Errors
    /// Unknown tracker credentials, invalid configuration, or HTTP client
    /// construction failure.
    pub fn from_credentials(
        mut config: NotificationConfig,
        provider: &dyn CredentialsProvider,
        timeout: Duration,
    ) -> Result<Self, RunError> {
        config.normalize();
        config.validate()?;
        let connection = provider.tracker(&config.tracker_credentials_id)?;
        let jira = JiraClient::new(&connection, timeout).map_err(RunError::Client)?;
        let client = ResilientClient::new(Arc::new(jira), RetryPolicy::from(&config.retry));
        Self::new(Arc::new(client), config)
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Reconcile the tracker with a violation set
    ///
    /// # Errors
    /// Only fatal errors raised before any write.
    pub async fn run(&self, violations: &[Violation]) -> Result<RunReport, RunError> {
        self.execute(violations, self.config.dry_run).await
    }

    /// Plan without writing, whatever the configured dry-run flag
    ///
    /// # Errors
    /// Only fatal errors raised before any write.
    pub async fn plan(&self, violations: &[Violation]) -> Result<RunReport, RunError> {
        self.execute(violations, true).await
    }

    async fn execute(&self, violations: &[Violation], dry_run: bool) -> Result<RunReport, RunError> {
        let mut report = RunReport::new(dry_run);
        if !self.config.enabled {
            info!("ticket notifications disabled, nothing to do");
            return Ok(report);
        }

        let resolver = self.prepare_resolver().await?;
        let planner = TicketPlanner::new(&self.config, &resolver);
        let grouping = planner.partition(violations);

        info!(
            project = %self.config.project_key,
            mode = ?planner.mode(),
            violations = violations.len(),
            groups = grouping.groups.len(),
            skipped = grouping.skipped.len(),
            dry_run,
            "starting reconciliation"
        );
        for skipped in &grouping.skipped {
            debug!(violation = %skipped.violation_id, reason = ?skipped.reason, "violation skipped");
        }
        report.skipped_violations = grouping.skipped;

        let pool = WorkerPool::new(self.config.concurrency);
        let jobs = grouping
            .groups
            .into_iter()
            .map(|group| (group.key.clone(), group))
            .collect();
        let (planner, resolver) = (&planner, &resolver);
        let outcomes = pool
            .run(jobs, move |group| async move {
                self.process_group(planner, resolver, &group, dry_run).await
            })
            .await;

        for outcome in outcomes {
            report.merge(outcome);
        }

        report.peak_workers = pool.stats().await.peak_active;
        info!(
            groups = report.groups,
            workers = pool.max_workers(),
            peak_workers = report.peak_workers,
            created = report.created,
            updated = report.updated,
            transitioned = report.transitioned,
            issues = report.issues.len(),
            dry_run,
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Build the field resolver before any write
    async fn prepare_resolver(&self) -> Result<FieldMappingResolver, RunError> {
        if self.config.field_mappings.is_empty() {
            return Ok(FieldMappingResolver::empty(&self.config));
        }

        let catalog = self
            .client
            .list_fields()
            .await
            .map_err(RunError::FieldCatalog)?;
        debug!(fields = catalog.len(), "read tracker field catalog");

        let mut issue_types = vec![self.config.issue_type.as_str()];
        if self.config.aggregation_mode().uses_subtasks() {
            issue_types.push(self.config.sub_task_issue_type.as_str());
        }
        let mut options: HashMap<String, Vec<String>> = HashMap::new();
        for issue_type in issue_types {
            match self
                .client
                .field_options(&self.config.project_key, issue_type)
                .await
            {
                Ok(found) => {
                    for (field, values) in found {
                        options.entry(field).or_insert(values);
                    }
                }
                Err(err) => warn!(
                    issue_type,
                    error = %err,
                    "could not read allowed field options, option values pass through unchecked"
                ),
            }
        }

        let resolver = FieldMappingResolver::build(&self.config, &catalog, &options)?;
        if !resolver.unresolved().is_empty() {
            warn!(fields = ?resolver.unresolved(), "mapped fields missing from tracker were skipped");
        }
        Ok(resolver)
    }

    async fn process_group(
        &self,
        planner: &TicketPlanner<'_>,
        resolver: &FieldMappingResolver,
        group: &AggregationGroup,
        dry_run: bool,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        let client = self.client.as_ref();

        let existing = match DeduplicationQuery::new(&self.config, resolver)
            .find(client, group)
            .await
        {
            Ok(existing) => {
                if let Some(message) = &existing.subtask_search_error {
                    outcome.issue(RunIssue::new(&group.key, IssueKind::Query, message.clone()));
                }
                existing
            }
            Err(err) => {
                warn!(
                    group = %group.key,
                    error = %err,
                    "dedup search failed, treating group as new; a duplicate ticket may be created"
                );
                outcome.issue(RunIssue::new(&group.key, IssueKind::Query, err.to_string()));
                ExistingTickets::none()
            }
        };

        let plan = planner.plan_group(group, &existing);
        for error in plan.mapping_errors {
            warn!(group = %group.key, error = %error, "field omitted from payload");
            outcome.issue(RunIssue::new(&group.key, IssueKind::Mapping, error.to_string()));
        }

        let mut parent = ParentState {
            key: existing.parent.map(|t| t.key),
            failed: false,
        };
        for operation in plan.operations {
            self.execute_operation(operation, &mut parent, dry_run, &mut outcome)
                .await;
        }
        outcome
    }

    async fn execute_operation(
        &self,
        operation: PlannedOperation,
        parent: &mut ParentState,
        dry_run: bool,
        outcome: &mut GroupOutcome,
    ) {
        let client = self.client.as_ref();
        let group = operation.group_key.clone();
        let name = operation.kind.name();

        if let OperationKind::Skip { reason } = &operation.kind {
            debug!(group = %group, reason = %reason, "skipping");
            outcome.record(operation, OperationStatus::NotAttempted, None);
            return;
        }

        if let OperationKind::TransitionTicket { ticket, target_status } = &operation.kind {
            let ticket = ticket.clone();
            debug!(group = %group, ticket = %ticket, target = %target_status, "transitioning");
            let engine = TransitionEngine::new(&self.config.transition, dry_run);
            let (status, issue) = match engine.apply(client, &ticket).await {
                Ok(TransitionOutcome::Applied(_)) => (OperationStatus::Applied, None),
                Ok(TransitionOutcome::Planned(_)) => (OperationStatus::DryRun, None),
                Err(err) => {
                    let kind = match &err {
                        TransitionError::NotFound { .. } => IssueKind::TransitionNotFound,
                        TransitionError::Ambiguous { .. } => IssueKind::TransitionAmbiguous,
                        TransitionError::Tracker(_) => IssueKind::Transition,
                    };
                    warn!(group = %group, ticket = %ticket, error = %err, "ticket keeps its current status");
                    let status = if kind == IssueKind::Transition {
                        OperationStatus::Failed
                    } else {
                        OperationStatus::NotAttempted
                    };
                    (status, Some(RunIssue::new(&group, kind, err.to_string())))
                }
            };
            if let Some(issue) = issue {
                outcome.issue(issue.for_operation(&operation.kind));
            }
            outcome.record(operation, status, Some(ticket));
            return;
        }

        let Some(fields) = operation.payload.clone() else {
            outcome.issue(
                RunIssue::new(&group, IssueKind::Write, "operation has no payload")
                    .for_operation(&operation.kind),
            );
            outcome.record(operation, OperationStatus::NotAttempted, None);
            return;
        };
        self.log_payload(&group, name, &fields, dry_run);

        let subtask_parent = match &operation.kind {
            OperationKind::CreateSubTask { parent: TicketRef::Existing(key) } => Some(key.clone()),
            OperationKind::CreateSubTask { parent: TicketRef::PendingParent } if !parent.failed => {
                parent.key.clone()
            }
            _ => None,
        };
        if matches!(operation.kind, OperationKind::CreateSubTask { .. })
            && subtask_parent.is_none()
            && !dry_run
        {
            warn!(group = %group, "parent ticket missing, sub-task not created");
            outcome.issue(
                RunIssue::new(&group, IssueKind::Write, "parent ticket was not created")
                    .for_operation(&operation.kind),
            );
            outcome.record(operation, OperationStatus::NotAttempted, None);
            return;
        }

        let result = match &operation.kind {
            OperationKind::CreateTicket if dry_run => Ok(None),
            OperationKind::CreateTicket => match client.create_ticket(&fields).await {
                Ok(key) => {
                    parent.key = Some(key.clone());
                    Ok(Some(key))
                }
                Err(err) => {
                    parent.failed = true;
                    Err(err.to_string())
                }
            },
            OperationKind::CreateSubTask { .. } => match (dry_run, subtask_parent) {
                (false, Some(parent_key)) => client
                    .create_subtask(&parent_key, &fields)
                    .await
                    .map(Some)
                    .map_err(|e| e.to_string()),
                _ => Ok(None),
            },
            OperationKind::UpdateTicket { ticket } if dry_run => Ok(Some(ticket.clone())),
            OperationKind::UpdateTicket { ticket } => client
                .update_fields(ticket, &fields)
                .await
                .map(|()| Some(ticket.clone()))
                .map_err(|e| e.to_string()),
            OperationKind::TransitionTicket { .. } | OperationKind::Skip { .. } => Ok(None),
        };

        match result {
            Ok(ticket) if dry_run => {
                outcome.record(operation, OperationStatus::DryRun, ticket);
            }
            Ok(ticket) => {
                info!(group = %group, operation = name, ticket = ?ticket, "ticket written");
                outcome.record(operation, OperationStatus::Applied, ticket);
            }
            Err(message) => {
                warn!(group = %group, operation = name, error = %message, "ticket write failed");
                outcome.issue(RunIssue::new(&group, IssueKind::Write, message).for_operation(&operation.kind));
                outcome.record(operation, OperationStatus::Failed, None);
            }
        }
    }

    fn log_payload(&self, group: &str, operation: &str, fields: &TicketFields, dry_run: bool) {
        let payload = serde_json::to_string(fields).unwrap_or_default();
        if dry_run {
            info!(group, operation, payload = %payload, "dry run: would write ticket");
        } else if self.config.verbose_logging {
            info!(group, operation, payload = %payload, "writing ticket");
        } else {
            debug!(group, operation, payload = %payload, "writing ticket");
        }
    }
}
