//! Notification configuration
//!
//! One versioned schema for every historical shape of the notifier settings:
//! - current fields are explicit, optional where a feature may be absent
//! - legacy toggles and per-attribute field names are still accepted and are
//!   folded into the current fields by [`NotificationConfig::normalize`]
//! - [`NotificationConfig::validate`] runs eagerly, before any tracker call

use crate::attribute::Attribute;
use crate::error::ConfigError;
use chrono::format::{Item, StrftimeItems};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// How violations are aggregated into tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// One ticket per violation
    #[default]
    Individual,
    /// One ticket per component
    ByComponent,
    /// One ticket per component with one sub-task per violation
    #[serde(alias = "by_component_with_sub_tasks")]
    ByComponentWithSubtasks,
}

impl AggregationMode {
    /// Whether violations are grouped by component
    #[inline]
    #[must_use]
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, AggregationMode::Individual)
    }

    /// Whether each violation also gets a sub-task
    #[inline]
    #[must_use]
    pub fn uses_subtasks(&self) -> bool {
        matches!(self, AggregationMode::ByComponentWithSubtasks)
    }
}

/// Ticket workflow transition settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Whether existing tickets are transitioned
    pub enabled: bool,
    /// Status the ticket should end up in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status: Option<String>,
    /// Exact workflow transition name, preferred over the status match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_name: Option<String>,
}

/// Where a mapped field takes its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// A violation (or group) attribute
    Attribute(Attribute),
    /// A fixed value
    Constant(String),
    /// An entry of the run's dynamic data
    DynamicData(String),
}

/// One configured custom field mapping
///
/// Exactly one of `attribute`, `value` or `dynamic_data_key` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappingEntry {
    /// Tracker field name (or id)
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_data_key: Option<String>,
}

impl FieldMappingEntry {
    /// Map a tracker field to an attribute
    #[inline]
    #[must_use]
    pub fn for_attribute(field: impl Into<String>, attribute: Attribute) -> Self {
        Self {
            field: field.into(),
            attribute: Some(attribute),
            value: None,
            dynamic_data_key: None,
        }
    }

    /// Map a tracker field to a constant
    #[inline]
    #[must_use]
    pub fn for_constant(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            attribute: None,
            value: Some(value.into()),
            dynamic_data_key: None,
        }
    }

    /// Map a tracker field to a dynamic data entry
    #[inline]
    #[must_use]
    pub fn for_dynamic_data(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            attribute: None,
            value: None,
            dynamic_data_key: Some(key.into()),
        }
    }

    /// Resolve the value source
    ///
    /// # Errors
    /// `InvalidFieldMapping` unless exactly one source is set.
    pub fn source(&self) -> Result<FieldSource, ConfigError> {
        match (&self.attribute, &self.value, &self.dynamic_data_key) {
            (Some(attribute), None, None) => Ok(FieldSource::Attribute(*attribute)),
            (None, Some(value), None) => Ok(FieldSource::Constant(value.clone())),
            (None, None, Some(key)) => Ok(FieldSource::DynamicData(key.clone())),
            (None, None, None) => Err(ConfigError::invalid_mapping(
                &self.field,
                "one of `attribute`, `value` or `dynamic_data_key` is required",
            )),
            _ => Err(ConfigError::invalid_mapping(
                &self.field,
                "only one of `attribute`, `value` or `dynamic_data_key` may be set",
            )),
        }
    }
}

/// Forces a tracker field type regardless of what the tracker reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeOverride {
    /// Detected type name or custom type id
    #[serde(alias = "original_type_name")]
    pub original_type: String,
    /// Type to treat the field as
    #[serde(alias = "override_with_this_type_name")]
    pub override_type: String,
}

/// Date rendering for date-typed fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DateFormat {
    /// ISO-8601 (`%Y-%m-%d` for dates, RFC 3339 for date-times)
    #[default]
    Iso8601,
    /// Epoch milliseconds, unformatted
    Epoch,
    /// strftime-style pattern
    Pattern(String),
}

impl From<String> for DateFormat {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "iso8601" | "iso-8601" => DateFormat::Iso8601,
            "epoch" => DateFormat::Epoch,
            _ => DateFormat::Pattern(value),
        }
    }
}

impl From<DateFormat> for String {
    fn from(value: DateFormat) -> Self {
        match value {
            DateFormat::Iso8601 => "iso8601".to_string(),
            DateFormat::Epoch => "epoch".to_string(),
            DateFormat::Pattern(pattern) => pattern,
        }
    }
}

impl DateFormat {
    /// Check that a pattern contains only valid strftime items
    ///
    /// # Errors
    /// `InvalidDateFormat` for patterns chrono cannot format with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let DateFormat::Pattern(pattern) = self {
            if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                return Err(ConfigError::InvalidDateFormat(pattern.clone()));
            }
        }
        Ok(())
    }
}

/// Bounded exponential backoff for tracker calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetrySettings {
    /// Base delay as a duration
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a duration
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Application context of the evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Settings accepted from older configuration shapes
///
/// Consumed by [`NotificationConfig::normalize`]; always empty afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_create_individual_tickets: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_aggregate_tickets_by_component: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_transition_jira_tickets: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_transition_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_stage_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_id_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_detect_date_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_date_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cve_code_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_type_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_type_custom_field_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name_custom_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name_custom_field_value: Option<String>,
}

impl LegacySettings {
    /// Whether any legacy setting is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn aggregation(&self) -> Option<AggregationMode> {
        match (
            self.should_create_individual_tickets,
            self.should_aggregate_tickets_by_component,
        ) {
            (None, None) => None,
            (Some(true), _) => Some(AggregationMode::Individual),
            (_, Some(true)) => Some(AggregationMode::ByComponent),
            _ => Some(AggregationMode::ByComponentWithSubtasks),
        }
    }

    fn field_mappings(&self) -> Vec<FieldMappingEntry> {
        let attribute_fields = [
            (&self.application_custom_field_name, Attribute::Application),
            (&self.organization_custom_field_name, Attribute::Organization),
            (&self.scan_stage_custom_field_name, Attribute::ScanStage),
            (&self.violation_id_custom_field_name, Attribute::ViolationId),
            (
                &self.violation_detect_date_custom_field_name,
                Attribute::DetectedDate,
            ),
            (&self.last_scan_date_custom_field_name, Attribute::LastScanDate),
            (&self.severity_custom_field_name, Attribute::Severity),
            (&self.cve_code_custom_field_name, Attribute::CveCode),
            (&self.cvss_custom_field_name, Attribute::CvssScore),
        ];
        let constant_fields = [
            (
                &self.scan_type_custom_field_name,
                &self.scan_type_custom_field_value,
            ),
            (
                &self.tool_name_custom_field_name,
                &self.tool_name_custom_field_value,
            ),
        ];

        let mut entries: Vec<FieldMappingEntry> = attribute_fields
            .into_iter()
            .filter_map(|(name, attribute)| {
                non_blank(name.as_deref()).map(|n| FieldMappingEntry::for_attribute(n, attribute))
            })
            .collect();
        entries.extend(constant_fields.into_iter().filter_map(|(name, value)| {
            match (non_blank(name.as_deref()), non_blank(value.as_deref())) {
                (Some(name), Some(value)) => Some(FieldMappingEntry::for_constant(name, value)),
                _ => None,
            }
        }));
        entries
    }
}

/// Run configuration for ticket reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Schema version of the document
    pub schema_version: u32,
    /// Master switch; a disabled config performs no tracker calls
    #[serde(alias = "send_jira_notification")]
    pub enabled: bool,
    /// Raise log volume; never changes control flow
    pub verbose_logging: bool,
    /// Log writes instead of issuing them
    pub dry_run: bool,
    /// Tracker project key
    pub project_key: String,
    /// Issue type for tickets
    #[serde(alias = "issue_type_name")]
    pub issue_type: String,
    /// Issue type for per-violation sub-tasks
    pub sub_task_issue_type: String,
    /// Priority name for created tickets
    #[serde(alias = "priority_name", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Aggregation topology; filled by `normalize` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationMode>,
    /// Only policies whose name starts with this prefix are reconciled
    pub policy_filter_prefix: String,
    /// Workflow transition settings
    pub transition: TransitionConfig,
    /// Custom field mappings, in payload order
    pub field_mappings: Vec<FieldMappingEntry>,
    /// Field type overrides
    pub type_overrides: Vec<TypeOverride>,
    /// Rendering of date fields
    pub date_format: DateFormat,
    /// Upper bound on results read by one dedup query
    pub max_query_results: u32,
    /// Drop the custom-field clause from dedup queries
    pub disable_field_filter: bool,
    /// Groups processed concurrently
    pub concurrency: usize,
    /// Backoff for transient tracker failures
    pub retry: RetrySettings,
    /// Treat per-group write errors as a failed step
    pub fail_on_write_error: bool,
    /// Credential identifier of the tracker connection
    #[serde(alias = "job_jira_credentials_id")]
    pub tracker_credentials_id: String,
    /// Credential identifier of the source-control connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scm_credentials_id: Option<String>,
    /// Application the evaluation ran for
    pub application: ApplicationContext,
    /// Caller-supplied values addressable by field mappings
    pub dynamic_data: BTreeMap<String, String>,
    /// Older settings, folded in by `normalize`
    #[serde(flatten)]
    pub legacy: LegacySettings,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            enabled: true,
            verbose_logging: false,
            dry_run: false,
            project_key: String::new(),
            issue_type: "Bug".to_string(),
            sub_task_issue_type: "Sub-task".to_string(),
            priority: None,
            aggregation: None,
            policy_filter_prefix: String::new(),
            transition: TransitionConfig::default(),
            field_mappings: Vec::new(),
            type_overrides: Vec::new(),
            date_format: DateFormat::default(),
            max_query_results: 50,
            disable_field_filter: false,
            concurrency: 2,
            retry: RetrySettings::default(),
            fail_on_write_error: false,
            tracker_credentials_id: String::new(),
            scm_credentials_id: None,
            application: ApplicationContext::default(),
            dynamic_data: BTreeMap::new(),
            legacy: LegacySettings::default(),
        }
    }
}

impl NotificationConfig {
    /// Create configuration for a project with defaults
    #[inline]
    #[must_use]
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            tracker_credentials_id: "tracker".to_string(),
            ..Self::default()
        }
    }

    /// With aggregation mode
    #[inline]
    #[must_use]
    pub fn with_aggregation(mut self, mode: AggregationMode) -> Self {
        self.aggregation = Some(mode);
        self
    }

    /// With policy filter prefix
    #[inline]
    #[must_use]
    pub fn with_policy_filter(mut self, prefix: impl Into<String>) -> Self {
        self.policy_filter_prefix = prefix.into();
        self
    }

    /// With transitions to the given status
    #[inline]
    #[must_use]
    pub fn with_transition_to(mut self, status: impl Into<String>) -> Self {
        self.transition.enabled = true;
        self.transition.target_status = Some(status.into());
        self
    }

    /// With a field mapping
    #[inline]
    #[must_use]
    pub fn with_field(mut self, entry: FieldMappingEntry) -> Self {
        self.field_mappings.push(entry);
        self
    }

    /// With dry run enabled
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Effective aggregation mode
    #[inline]
    #[must_use]
    pub fn aggregation_mode(&self) -> AggregationMode {
        self.aggregation.unwrap_or_default()
    }

    /// Fold legacy settings into the current schema
    ///
    /// Explicit current settings always win over legacy ones. Blank optional
    /// strings become `None`. Idempotent.
    pub fn normalize(&mut self) {
        let legacy = std::mem::take(&mut self.legacy);

        if self.aggregation.is_none() {
            self.aggregation = Some(legacy.aggregation().unwrap_or_default());
        }

        if legacy.should_transition_jira_tickets == Some(true) {
            self.transition.enabled = true;
        }
        if self.transition.target_status.is_none() {
            self.transition.target_status = legacy.jira_transition_status.clone();
        }

        for entry in legacy.field_mappings() {
            let already_mapped = self
                .field_mappings
                .iter()
                .any(|existing| existing.field.eq_ignore_ascii_case(&entry.field));
            if already_mapped {
                tracing::debug!(field = %entry.field, "legacy field mapping shadowed by explicit mapping");
            } else {
                self.field_mappings.push(entry);
            }
        }

        self.project_key = self.project_key.trim().to_string();
        self.policy_filter_prefix = self.policy_filter_prefix.trim().to_string();
        blank_to_none(&mut self.priority);
        blank_to_none(&mut self.scm_credentials_id);
        blank_to_none(&mut self.transition.target_status);
        blank_to_none(&mut self.transition.transition_name);

        if self.schema_version < CURRENT_SCHEMA_VERSION {
            self.schema_version = CURRENT_SCHEMA_VERSION;
        }
    }

    /// Eagerly validate the configuration
    ///
    /// A disabled configuration is always valid.
    ///
    /// # Errors
    /// The first problem found, as a fatal [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchemaVersion {
                found: self.schema_version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }
        if !self.enabled {
            return Ok(());
        }

        require(&self.project_key, "project_key")?;
        require(&self.issue_type, "issue_type")?;
        require(&self.tracker_credentials_id, "tracker_credentials_id")?;
        if self.aggregation_mode().uses_subtasks() && self.sub_task_issue_type.trim().is_empty() {
            return Err(ConfigError::MissingSetting {
                setting: "sub_task_issue_type",
                reason: "required when aggregating with sub-tasks",
            });
        }
        if self.transition.enabled
            && self.transition.target_status.is_none()
            && self.transition.transition_name.is_none()
        {
            return Err(ConfigError::MissingSetting {
                setting: "transition.target_status",
                reason: "a target status or transition name is required when transitions are enabled",
            });
        }
        if self.max_query_results == 0 {
            return Err(ConfigError::invalid("max_query_results", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        self.date_format.validate()?;

        let mut seen: Vec<String> = Vec::with_capacity(self.field_mappings.len());
        for entry in &self.field_mappings {
            if entry.field.trim().is_empty() {
                return Err(ConfigError::invalid_mapping("<blank>", "field name is empty"));
            }
            entry.source()?;
            let folded = entry.field.trim().to_lowercase();
            if seen.contains(&folded) {
                return Err(ConfigError::DuplicateFieldMapping(entry.field.clone()));
            }
            seen.push(folded);
        }

        for type_override in &self.type_overrides {
            if type_override.original_type.trim().is_empty()
                || type_override.override_type.trim().is_empty()
            {
                return Err(ConfigError::invalid(
                    "type_overrides",
                    "type names must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Read, normalize and validate a configuration file
    ///
    /// # Errors
    /// IO, parse or validation errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = parse_document(&text, ConfigFormat::from_path(path)?)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }
}

fn require(value: &str, setting: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingSetting {
            setting,
            reason: "required when notifications are enabled",
        })
    } else {
        Ok(())
    }
}

fn blank_to_none(value: &mut Option<String>) {
    if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        *value = None;
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Serialization format of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from a file extension
    ///
    /// # Errors
    /// `UnsupportedFormat` for unknown or missing extensions.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Parse a document in the given format
///
/// # Errors
/// `Parse` with the underlying parser message.
pub fn parse_document<T: DeserializeOwned>(text: &str, format: ConfigFormat) -> Result<T, ConfigError> {
    match format {
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
        ConfigFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}
