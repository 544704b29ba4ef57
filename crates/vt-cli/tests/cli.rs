//! Settings files, violation documents and report output on disk

use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile};
use vt_cli::{
    describe, exit_code, load_violations, reconcile, write_report, CliSettings, EXIT_OK,
    EXIT_WRITE_FAILED,
};
use vt_core::ReconciliationRunner;
use vt_test_utils::{scenario_a, InMemoryTracker};
use vt_tracker::{TicketClient, TrackerError};

fn file_with(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const SETTINGS: &str = r#"
http_timeout_secs = 10

[notification]
project_key = "SEC"
tracker_credentials_id = "jira"
aggregation = "by_component"
policy_filter_prefix = "CM-"
fail_on_write_error = true

[notification.transition]
enabled = true
target_status = "In Progress"

[credentials.jira]
base_url = "https://jira.example.com"
username = "ci"
password_env = "VT_CLI_TEST_PASSWORD"
"#;

#[test]
fn loads_toml_settings() {
    let file = file_with(".toml", SETTINGS);
    let settings = CliSettings::load(file.path()).unwrap();

    assert_eq!(settings.notification.project_key, "SEC");
    assert_eq!(settings.http_timeout().as_secs(), 10);
    assert_eq!(
        describe(&settings),
        "project SEC (Bug), mode ByComponent, 0 field mapping(s), transitions on, dry run off"
    );
}

#[test]
fn loads_yaml_settings() {
    let yaml = "
notification:
  project_key: SEC
  tracker_credentials_id: jira
  enabled: false
";
    let file = file_with(".yml", yaml);
    let settings = CliSettings::load(file.path()).unwrap();
    assert_eq!(describe(&settings), "notifications disabled");
}

#[test]
fn rejects_unknown_extension_and_invalid_settings() {
    let file = file_with(".ini", SETTINGS);
    assert!(CliSettings::load(file.path()).is_err());

    let invalid = file_with(".toml", "[notification]\nproject_key = \"\"\n");
    assert!(CliSettings::load(invalid.path()).is_err());
}

#[test]
fn loads_violation_document() {
    let json = serde_json::to_string(&scenario_a()).unwrap();
    let file = file_with(".json", &json);
    let violations = load_violations(file.path()).unwrap();
    assert_eq!(violations, scenario_a());

    let broken = file_with(".json", "{\"violations\": 3}");
    let err = load_violations(broken.path()).unwrap_err();
    assert!(err.to_string().contains("invalid violation document"));
}

#[tokio::test]
async fn write_failures_drive_exit_code() {
    let file = file_with(".toml", SETTINGS);
    let settings = CliSettings::load(file.path()).unwrap();
    let tracker = Arc::new(InMemoryTracker::new());
    tracker.fail_matching("create_ticket", "lib-b", TrackerError::field("summary", "rejected"));
    let client: Arc<dyn TicketClient> = tracker.clone();
    let runner = ReconciliationRunner::new(client, settings.notification.clone()).unwrap();

    let report = reconcile(&runner, &scenario_a(), false).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(exit_code(&report, true), EXIT_WRITE_FAILED);
    assert_eq!(exit_code(&report, false), EXIT_OK);

    let planned = reconcile(&runner, &scenario_a(), true).await.unwrap();
    assert_eq!(exit_code(&planned, true), EXIT_OK);
}

#[tokio::test]
async fn report_written_as_json() {
    let tracker = Arc::new(InMemoryTracker::new());
    let client: Arc<dyn TicketClient> = tracker;
    let settings = CliSettings::load(file_with(".toml", SETTINGS).path()).unwrap();
    let runner = ReconciliationRunner::new(client, settings.notification).unwrap();
    let report = reconcile(&runner, &scenario_a(), true).await.unwrap();

    let out = Builder::new().suffix(".json").tempfile().unwrap();
    write_report(&report, Some(out.path())).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path()).unwrap()).unwrap();
    assert_eq!(value["dry_run"], true);
    assert_eq!(value["created"], 2);
    assert_eq!(value["operations"].as_array().unwrap().len(), 2);
    assert_eq!(value["operations"][0]["kind"], "create_ticket");
}
