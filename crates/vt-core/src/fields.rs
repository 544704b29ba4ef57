//! Field mapping resolution and value coercion
//!
//! Built once per run from the configured mappings and the tracker field
//! catalog, then read-only. For every resolved field:
//! - the declared kind comes from the catalog schema, unless an override
//!   keyed by the detected type name or the full custom type id says otherwise
//! - values are coerced by kind (text, number, date, option, list)
//! - unresolved field names are skipped, never failed

use crate::error::{MappingError, RunError};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use vt_model::{
    ApplicationContext, Attribute, AttributeValue, DateFormat, FieldSource, NotificationConfig,
    TypeOverride, Violation,
};
use vt_tracker::{FieldValues, TrackerField};

/// Anything that can supply attribute values
pub trait AttributeSource {
    /// Value of an attribute, `None` when absent
    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue>;
}

impl AttributeSource for Violation {
    fn attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        Violation::attribute(self, attribute)
    }
}

/// Value kind of a tracker field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Plain text
    Text,
    /// Raw number
    Number,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Single select
    Option,
    /// Multi select
    MultiOption,
    /// Labels (list without whitespace)
    Labels,
    /// List of strings
    List,
}

impl FieldKind {
    /// Parse an override type name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "text" | "textfield" | "textarea" => Some(FieldKind::Text),
            "number" | "float" | "integer" => Some(FieldKind::Number),
            "date" | "datepicker" => Some(FieldKind::Date),
            "datetime" | "datetimepicker" => Some(FieldKind::DateTime),
            "option" | "select" | "radiobuttons" => Some(FieldKind::Option),
            "multi-option" | "multiselect" | "multicheckboxes" => Some(FieldKind::MultiOption),
            "labels" => Some(FieldKind::Labels),
            "array" | "list" => Some(FieldKind::List),
            _ => None,
        }
    }

    /// Detect the kind from a catalog field
    #[must_use]
    pub fn detect(field: &TrackerField) -> Self {
        let Some(schema) = &field.schema else {
            return FieldKind::Text;
        };
        let custom = schema.custom.as_deref().unwrap_or_default();
        match schema.kind.as_str() {
            "number" => FieldKind::Number,
            "date" => FieldKind::Date,
            "datetime" => FieldKind::DateTime,
            "option" | "option-with-child" => FieldKind::Option,
            "array" => match schema.items.as_deref() {
                Some("option") => FieldKind::MultiOption,
                _ if custom.ends_with(":labels") || field.id == "labels" => FieldKind::Labels,
                _ => FieldKind::List,
            },
            _ => FieldKind::Text,
        }
    }
}

/// A configured mapping resolved against the tracker catalog
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    /// Tracker field id
    pub field_id: String,
    /// Configured field name
    pub name: String,
    pub kind: FieldKind,
    /// Whether the kind came from an override
    pub overridden: bool,
    pub source: FieldSource,
    /// Allowed option values, empty when unknown
    pub options: Vec<String>,
}

/// Resolves configured field mappings and coerces values
#[derive(Debug, Clone)]
pub struct FieldMappingResolver {
    mappings: Vec<FieldMapping>,
    unresolved: Vec<String>,
    date_format: DateFormat,
    application: ApplicationContext,
    dynamic_data: HashMap<String, String>,
}

impl FieldMappingResolver {
    /// Resolver with no custom fields
    #[must_use]
    pub fn empty(config: &NotificationConfig) -> Self {
        Self {
            mappings: Vec::new(),
            unresolved: Vec::new(),
            date_format: config.date_format.clone(),
            application: config.application.clone(),
            dynamic_data: config
                .dynamic_data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Resolve the configured mappings against a field catalog
    ///
    /// Fields are looked up by id, then by name (case-insensitive). Names
    /// that match nothing are recorded as unresolved and skipped.
    ///
    /// # Errors
    /// `Config` for mappings without exactly one source,
    /// `InvalidTypeOverride` for unknown override type names.
    pub fn build(
        config: &NotificationConfig,
        catalog: &[TrackerField],
        options: &HashMap<String, Vec<String>>,
    ) -> Result<Self, RunError> {
        let overrides = parse_overrides(&config.type_overrides)?;
        let mut resolver = Self::empty(config);

        for entry in &config.field_mappings {
            let source = entry.source()?;
            let wanted = entry.field.trim();
            let found = catalog
                .iter()
                .find(|f| f.id == wanted)
                .or_else(|| catalog.iter().find(|f| f.name.eq_ignore_ascii_case(wanted)));

            let Some(field) = found else {
                tracing::warn!(field = wanted, "mapped field not found in tracker, skipping");
                resolver.unresolved.push(wanted.to_string());
                continue;
            };

            let detected = FieldKind::detect(field);
            let forced = field.schema.as_ref().and_then(|schema| {
                schema
                    .custom
                    .as_deref()
                    .and_then(|custom| overrides.get(custom))
                    .or_else(|| overrides.get(schema.kind.as_str()))
                    .copied()
            });

            tracing::debug!(
                field = wanted,
                field_id = %field.id,
                ?detected,
                ?forced,
                "resolved field mapping"
            );
            resolver.mappings.push(FieldMapping {
                field_id: field.id.clone(),
                name: wanted.to_string(),
                kind: forced.unwrap_or(detected),
                overridden: forced.is_some(),
                source,
                options: options.get(&field.id).cloned().unwrap_or_default(),
            });
        }

        Ok(resolver)
    }

    /// Resolved mappings, in configured order
    #[inline]
    #[must_use]
    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    /// Configured names that matched no tracker field
    #[inline]
    #[must_use]
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// The mapping carrying an attribute, if any
    #[must_use]
    pub fn field_for(&self, attribute: Attribute) -> Option<&FieldMapping> {
        self.mappings
            .iter()
            .find(|m| m.source == FieldSource::Attribute(attribute))
    }

    /// Resolve every mapped field for a subject
    ///
    /// Absent or empty values are omitted silently; values that cannot be
    /// coerced are omitted and reported.
    pub fn resolve(&self, subject: &dyn AttributeSource) -> (FieldValues, Vec<MappingError>) {
        let mut values = FieldValues::new();
        let mut errors = Vec::new();

        for mapping in &self.mappings {
            let raw = match &mapping.source {
                FieldSource::Attribute(attribute) => self.attribute_value(subject, *attribute),
                FieldSource::Constant(value) => Some(AttributeValue::Text(value.clone())),
                FieldSource::DynamicData(key) => match self.dynamic_data.get(key) {
                    Some(value) => Some(AttributeValue::Text(value.clone())),
                    None => {
                        errors.push(MappingError::MissingDynamicData {
                            field: mapping.name.clone(),
                            key: key.clone(),
                        });
                        None
                    }
                },
            };

            let Some(raw) = raw.filter(|v| !v.is_empty()) else {
                continue;
            };
            match self.coerce(mapping, &raw) {
                Ok(Some(value)) => {
                    values.insert(mapping.field_id.clone(), value);
                }
                Ok(None) => {}
                Err(mut field_errors) => errors.append(&mut field_errors),
            }
        }

        (values, errors)
    }

    fn attribute_value(
        &self,
        subject: &dyn AttributeSource,
        attribute: Attribute,
    ) -> Option<AttributeValue> {
        match attribute {
            Attribute::Application => self.application.application_name.clone().map(Into::into),
            Attribute::Organization => self.application.organization_name.clone().map(Into::into),
            Attribute::ScanStage => subject
                .attribute(attribute)
                .or_else(|| self.application.stage.clone().map(Into::into)),
            other => subject.attribute(other),
        }
    }

    /// Coerce a value for one field
    ///
    /// `Ok(None)` means nothing is left to send (every list item dropped).
    fn coerce(
        &self,
        mapping: &FieldMapping,
        raw: &AttributeValue,
    ) -> Result<Option<Value>, Vec<MappingError>> {
        let single = |e| vec![e];
        match mapping.kind {
            FieldKind::Text => Ok(Some(Value::String(match raw {
                AttributeValue::Date(date) => self.format_date(date, false).to_text(),
                other => other.to_text(),
            }))),
            FieldKind::Number => coerce_number(mapping, raw).map(Some).map_err(single),
            FieldKind::Date | FieldKind::DateTime => {
                let date = as_date(raw).ok_or_else(|| {
                    single(MappingError::NotDate {
                        field: mapping.name.clone(),
                        value: raw.to_text(),
                    })
                })?;
                Ok(Some(self.format_date(&date, mapping.kind == FieldKind::DateTime).0))
            }
            FieldKind::Option => match_option(mapping, &raw.to_text())
                .map(|v| Some(json!({ "value": v })))
                .map_err(single),
            FieldKind::MultiOption => {
                let mut matched = Vec::new();
                let mut errors = Vec::new();
                for item in raw.to_list() {
                    match match_option(mapping, &item) {
                        Ok(v) => matched.push(json!({ "value": v })),
                        Err(e) => errors.push(e),
                    }
                }
                if matched.is_empty() && !errors.is_empty() {
                    return Err(errors);
                }
                for error in &errors {
                    tracing::warn!(%error, "dropping unmatched option");
                }
                Ok((!matched.is_empty()).then_some(Value::Array(matched)))
            }
            FieldKind::Labels => {
                let labels: Vec<Value> = raw
                    .to_list()
                    .iter()
                    .map(|l| l.split_whitespace().collect::<Vec<_>>().join("_"))
                    .filter(|l| !l.is_empty())
                    .map(Value::String)
                    .collect();
                Ok((!labels.is_empty()).then_some(Value::Array(labels)))
            }
            FieldKind::List => Ok(Some(Value::Array(
                raw.to_list().into_iter().map(Value::String).collect(),
            ))),
        }
    }

    fn format_date(&self, date: &DateTime<Utc>, with_time: bool) -> FormattedDate {
        let value = match &self.date_format {
            DateFormat::Epoch => json!(date.timestamp_millis()),
            DateFormat::Iso8601 if with_time => {
                Value::String(date.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string())
            }
            DateFormat::Iso8601 => Value::String(date.format("%Y-%m-%d").to_string()),
            DateFormat::Pattern(pattern) => {
                let mut out = String::new();
                if write!(out, "{}", date.format(pattern)).is_err() {
                    out = date.to_rfc3339();
                }
                Value::String(out)
            }
        };
        FormattedDate(value)
    }
}

struct FormattedDate(Value);

impl FormattedDate {
    fn to_text(&self) -> String {
        match &self.0 {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn parse_overrides(overrides: &[TypeOverride]) -> Result<HashMap<String, FieldKind>, RunError> {
    overrides
        .iter()
        .map(|o| {
            FieldKind::parse(&o.override_type)
                .map(|kind| (o.original_type.trim().to_string(), kind))
                .ok_or_else(|| RunError::InvalidTypeOverride {
                    original: o.original_type.clone(),
                    target: o.override_type.clone(),
                })
        })
        .collect()
}

fn coerce_number(mapping: &FieldMapping, raw: &AttributeValue) -> Result<Value, MappingError> {
    match raw {
        AttributeValue::Integer(value) => Ok(json!(value)),
        other => other
            .as_number()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .ok_or_else(|| MappingError::NotNumeric {
                field: mapping.name.clone(),
                value: other.to_text(),
            }),
    }
}

fn as_date(raw: &AttributeValue) -> Option<DateTime<Utc>> {
    match raw {
        AttributeValue::Date(date) => Some(*date),
        AttributeValue::Integer(millis) => DateTime::from_timestamp_millis(*millis),
        AttributeValue::Text(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        AttributeValue::Number(_) | AttributeValue::List(_) => None,
    }
}

/// Case-insensitive option match, returning the tracker's spelling
///
/// With no known options the value passes through unchanged.
fn match_option(mapping: &FieldMapping, value: &str) -> Result<String, MappingError> {
    let value = value.trim();
    if mapping.options.is_empty() {
        return Ok(value.to_string());
    }
    mapping
        .options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(value))
        .cloned()
        .ok_or_else(|| MappingError::UnmatchedOption {
            field: mapping.name.clone(),
            value: value.to_string(),
        })
}
