//! Mappable violation attributes
//!
//! An [`Attribute`] names one logical piece of violation data that a field
//! mapping can project onto a tracker custom field. [`AttributeValue`] is the
//! untyped value handed to the field coercion step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical violation attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Violation identifier
    ViolationId,
    /// Name of the policy that was violated
    PolicyName,
    /// Numeric policy severity
    Severity,
    /// CVSS score of the underlying vulnerability
    CvssScore,
    /// CVE identifier
    CveCode,
    /// Policy threat level
    ThreatLevel,
    /// First detection date
    DetectedDate,
    /// Most recent scan date
    LastScanDate,
    /// Scan stage (build, release, ...)
    ScanStage,
    /// Component identifier
    Component,
    /// Effective licenses (falls back to declared and observed)
    Licenses,
    /// Recommended remediation text
    Remediation,
    /// Files in which the component was found
    FileOccurrences,
    /// Application name from the run context
    Application,
    /// Organization name from the run context
    Organization,
}

impl Attribute {
    /// All attributes, in declaration order
    pub const ALL: [Attribute; 15] = [
        Attribute::ViolationId,
        Attribute::PolicyName,
        Attribute::Severity,
        Attribute::CvssScore,
        Attribute::CveCode,
        Attribute::ThreatLevel,
        Attribute::DetectedDate,
        Attribute::LastScanDate,
        Attribute::ScanStage,
        Attribute::Component,
        Attribute::Licenses,
        Attribute::Remediation,
        Attribute::FileOccurrences,
        Attribute::Application,
        Attribute::Organization,
    ];

    /// Snake-case name, as written in configuration files
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::ViolationId => "violation_id",
            Attribute::PolicyName => "policy_name",
            Attribute::Severity => "severity",
            Attribute::CvssScore => "cvss_score",
            Attribute::CveCode => "cve_code",
            Attribute::ThreatLevel => "threat_level",
            Attribute::DetectedDate => "detected_date",
            Attribute::LastScanDate => "last_scan_date",
            Attribute::ScanStage => "scan_stage",
            Attribute::Component => "component",
            Attribute::Licenses => "licenses",
            Attribute::Remediation => "remediation",
            Attribute::FileOccurrences => "file_occurrences",
            Attribute::Application => "application",
            Attribute::Organization => "organization",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value before coercion to a tracker field type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Free text
    Text(String),
    /// Whole number
    Integer(i64),
    /// Decimal number
    Number(f64),
    /// Point in time
    Date(DateTime<Utc>),
    /// Several text values
    List(Vec<String>),
}

impl AttributeValue {
    /// Render the value as plain text
    ///
    /// Lists are joined with `", "`, dates use RFC 3339.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::Text(text) => text.clone(),
            AttributeValue::Integer(value) => value.to_string(),
            AttributeValue::Number(value) => value.to_string(),
            AttributeValue::Date(date) => date.to_rfc3339(),
            AttributeValue::List(values) => values.join(", "),
        }
    }

    /// Numeric view of the value, parsing text when needed
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(value) => Some(*value as f64),
            AttributeValue::Number(value) => Some(*value),
            AttributeValue::Text(text) => text.trim().parse().ok(),
            AttributeValue::Date(_) | AttributeValue::List(_) => None,
        }
    }

    /// List view of the value; scalars become a one-element list
    #[must_use]
    pub fn to_list(&self) -> Vec<String> {
        match self {
            AttributeValue::List(values) => values.clone(),
            other => vec![other.to_text()],
        }
    }

    /// Whether the value carries no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(text) => text.trim().is_empty(),
            AttributeValue::List(values) => values.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names_round_trip_through_serde() {
        for attribute in Attribute::ALL {
            let json = serde_json::to_string(&attribute).unwrap();
            assert_eq!(json, format!("\"{}\"", attribute.as_str()));
        }
    }

    #[test]
    fn value_as_number() {
        assert_eq!(AttributeValue::Integer(7).as_number(), Some(7.0));
        assert_eq!(AttributeValue::from(" 9.8 ").as_number(), Some(9.8));
        assert_eq!(AttributeValue::from("high").as_number(), None);
    }

    #[test]
    fn list_renders_joined() {
        let value = AttributeValue::List(vec!["MIT".into(), "Apache-2.0".into()]);
        assert_eq!(value.to_text(), "MIT, Apache-2.0");
        assert_eq!(AttributeValue::Integer(3).to_list(), vec!["3".to_string()]);
    }

    #[test]
    fn empty_values() {
        assert!(AttributeValue::from("  ").is_empty());
        assert!(AttributeValue::List(vec![]).is_empty());
        assert!(!AttributeValue::Integer(0).is_empty());
    }
}
