//! Testing utilities for the violation tickets workspace
//!
//! Shared test helpers, fixtures, and an in-memory tracker.

#![allow(missing_docs)]

pub mod tracker;

pub use tracker::{default_workflow, Call, InMemoryTracker};

use chrono::{TimeZone, Utc};
use vt_model::{
    AggregationMode, Attribute, ComponentIdentifier, FieldMappingEntry, NotificationConfig,
    Violation,
};
use vt_tracker::TrackerField;

pub const PROJECT: &str = "SEC";

pub const VIOLATION_ID_FIELD: &str = "customfield_10100";
pub const COMPONENT_FIELD: &str = "customfield_10101";
pub const SEVERITY_FIELD: &str = "customfield_10102";
pub const DETECTED_FIELD: &str = "customfield_10103";
pub const SCAN_TYPE_FIELD: &str = "customfield_10104";
pub const LICENSES_FIELD: &str = "customfield_10105";

pub fn component(name: &str) -> ComponentIdentifier {
    ComponentIdentifier::from_coordinates("org.acme", name, "1.0")
}

pub fn violation(id: &str, policy: &str, component_name: &str, severity: i64) -> Violation {
    Violation::new(id, policy, component(component_name))
        .with_severity(severity)
        .with_threat_level(severity)
        .with_dates(
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        )
}

/// lib-a at severities 9, 7 and 2, lib-b at 4, all under a `CM-` policy
pub fn scenario_a() -> Vec<Violation> {
    vec![
        violation("v-1", "CM-Security", "lib-a", 7),
        violation("v-2", "CM-Security", "lib-a", 9),
        violation("v-3", "CM-License", "lib-b", 4),
        violation("v-4", "CM-Security", "lib-a", 2),
    ]
}

pub fn config() -> NotificationConfig {
    NotificationConfig::new(PROJECT)
}

pub fn aggregated_config() -> NotificationConfig {
    config()
        .with_aggregation(AggregationMode::ByComponent)
        .with_policy_filter("CM-")
}

pub fn subtask_config() -> NotificationConfig {
    config()
        .with_aggregation(AggregationMode::ByComponentWithSubtasks)
        .with_policy_filter("CM-")
}

/// Catalog with one field per common attribute
pub fn standard_catalog() -> Vec<TrackerField> {
    vec![
        TrackerField::new("summary", "Summary", "string"),
        TrackerField::new(VIOLATION_ID_FIELD, "Violation Id", "string"),
        TrackerField::new(COMPONENT_FIELD, "Component Key", "string"),
        TrackerField::new(SEVERITY_FIELD, "Severity", "number"),
        TrackerField::new(DETECTED_FIELD, "Detected Date", "date"),
        TrackerField::new(SCAN_TYPE_FIELD, "Scan Type", "option"),
        TrackerField::new(LICENSES_FIELD, "Licenses", "array")
            .with_items("string")
            .with_custom_type("com.atlassian.jira.plugin.system.customfieldtypes:labels"),
    ]
}

/// Mappings for the fields in [`standard_catalog`]
pub fn standard_mappings(config: NotificationConfig) -> NotificationConfig {
    config
        .with_field(FieldMappingEntry::for_attribute("Violation Id", Attribute::ViolationId))
        .with_field(FieldMappingEntry::for_attribute("Component Key", Attribute::Component))
        .with_field(FieldMappingEntry::for_attribute("Severity", Attribute::Severity))
        .with_field(FieldMappingEntry::for_attribute("Detected Date", Attribute::DetectedDate))
        .with_field(FieldMappingEntry::for_constant("Scan Type", "SCA"))
}

/// Tracker carrying [`standard_catalog`] and its option values
pub fn standard_tracker() -> InMemoryTracker {
    InMemoryTracker::new()
        .with_fields(standard_catalog())
        .with_options(SCAN_TYPE_FIELD, &["SCA", "SAST"])
}
