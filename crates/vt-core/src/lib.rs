//! Ticket reconciliation engine
//!
//! Turns a violation set into tracker tickets, idempotently:
//! - [`FieldMappingResolver`]: configured mappings resolved against the tracker
//!   catalog, with value coercion by field kind
//! - [`TicketPlanner`]: filtering, aggregation and operation planning
//! - [`DeduplicationQuery`]: discovery of tickets from earlier runs
//! - [`TransitionEngine`]: workflow transitions on existing tickets
//! - [`WorkerPool`]: bounded per-group concurrency
//! - [`ReconciliationRunner`]: the whole run, producing a [`RunReport`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vt_core::ReconciliationRunner;
//!
//! let runner = ReconciliationRunner::from_credentials(config, &credentials, Duration::from_secs(30))?;
//! let report = runner.run(&violations).await?;
//! println!("created {} tickets", report.created);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod dedup;
pub mod error;
pub mod fields;
pub mod planner;
pub mod pool;
pub mod report;
pub mod runner;
pub mod transition;

pub use dedup::{DeduplicationQuery, ExistingTickets};
pub use error::{MappingError, RunError, TransitionError};
pub use fields::{AttributeSource, FieldKind, FieldMapping, FieldMappingResolver};
pub use planner::{
    key_marker, AggregationGroup, GroupPlan, Grouping, OperationKind, PlannedOperation,
    SkipReason, SkippedViolation, TicketPlanner, TicketRef,
};
pub use pool::{PoolStats, WorkerPool};
pub use report::{
    GroupOutcome, IssueKind, OperationRecord, OperationStatus, RunIssue, RunReport,
};
pub use runner::ReconciliationRunner;
pub use transition::{TransitionEngine, TransitionOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
