//! `vt` command implementation
//!
//! Provides:
//! - [`CliSettings`]: the settings file (configuration plus connections)
//! - reconciliation and planning with a JSON [`RunReport`] as output
//! - build-status reporting to the source-control host
//! - exit codes separating fatal errors from write failures

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod logging;
pub mod settings;

pub use logging::LogFormat;
pub use settings::CliSettings;

use anyhow::{bail, Context};
use std::path::Path;
use tracing::info;
use vt_core::{ReconciliationRunner, RunReport};
use vt_model::{parse_violations, Violation};
use vt_status::{BitbucketReporter, BuildStatus};

/// Run completed; any write errors are tolerated
pub const EXIT_OK: u8 = 0;
/// Writes failed and the configuration asks for that to fail the step
pub const EXIT_WRITE_FAILED: u8 = 1;
/// Configuration, credentials or field catalog problem before any write
pub const EXIT_FATAL: u8 = 2;

/// Read a violation document
///
/// # Errors
/// IO or JSON errors, with the path as context.
pub fn load_violations(path: &Path) -> anyhow::Result<Vec<Violation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read violations from {}", path.display()))?;
    parse_violations(&text).with_context(|| format!("invalid violation document {}", path.display()))
}

/// Build the Jira-backed runner described by the settings
///
/// # Errors
/// Missing secrets, unknown credential ids or HTTP client failures.
pub fn runner_from_settings(settings: &CliSettings) -> anyhow::Result<ReconciliationRunner> {
    let credentials = settings.credentials().context("failed to resolve credentials")?;
    ReconciliationRunner::from_credentials(
        settings.notification.clone(),
        &credentials,
        settings.http_timeout(),
    )
    .context("failed to prepare reconciliation")
}

/// Run or plan reconciliation
///
/// # Errors
/// Fatal run errors only.
pub async fn reconcile(
    runner: &ReconciliationRunner,
    violations: &[Violation],
    plan_only: bool,
) -> anyhow::Result<RunReport> {
    let report = if plan_only {
        runner.plan(violations).await
    } else {
        runner.run(violations).await
    };
    report.context("reconciliation aborted before any ticket was written")
}

/// Exit code for a finished run
#[must_use]
pub fn exit_code(report: &RunReport, fail_on_write_error: bool) -> u8 {
    if fail_on_write_error && report.has_write_errors() {
        EXIT_WRITE_FAILED
    } else {
        EXIT_OK
    }
}

/// Write the report as pretty JSON to a file, or to stdout
///
/// # Errors
/// Serialization or IO errors.
pub fn write_report(report: &RunReport, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

/// One-line description of validated settings
#[must_use]
pub fn describe(settings: &CliSettings) -> String {
    let config = &settings.notification;
    if !config.enabled {
        return "notifications disabled".to_string();
    }
    format!(
        "project {} ({}), mode {:?}, {} field mapping(s), transitions {}, dry run {}",
        config.project_key,
        config.issue_type,
        config.aggregation_mode(),
        config.field_mappings.len(),
        if config.transition.enabled { "on" } else { "off" },
        if config.dry_run { "on" } else { "off" },
    )
}

/// Post a build status for a commit
///
/// # Errors
/// No source-control credentials configured, or the post failed.
pub async fn report_status(settings: &CliSettings, status: &BuildStatus) -> anyhow::Result<()> {
    let Some(id) = settings.notification.scm_credentials_id.as_deref() else {
        bail!("scm_credentials_id is not configured");
    };
    let credentials = settings.credentials().context("failed to resolve credentials")?;
    let reporter = BitbucketReporter::from_credentials(&credentials, id, settings.http_timeout())
        .context("failed to prepare status reporter")?;
    reporter
        .report(status)
        .await
        .with_context(|| format!("failed to post build status for {}", status.commit))?;
    info!(commit = %status.commit, passing = status.passing, "build status reported");
    Ok(())
}
