//! Policy violation records
//!
//! Violations are produced upstream by the policy evaluation and are
//! immutable for the duration of a run. The JSON form is camelCase; dates are
//! accepted either as RFC 3339 strings or as epoch milliseconds.

use crate::attribute::{Attribute, AttributeValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the component a violation was raised against
///
/// Either Maven-style coordinates or a package URL. When a package URL is
/// present it is the canonical identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_url: Option<String>,
}

impl ComponentIdentifier {
    /// Create identifier from a package URL
    #[inline]
    #[must_use]
    pub fn from_purl(purl: impl Into<String>) -> Self {
        Self {
            package_url: Some(purl.into()),
            ..Self::default()
        }
    }

    /// Create identifier from coordinates
    #[inline]
    #[must_use]
    pub fn from_coordinates(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: Some(group.into()),
            name: Some(name.into()),
            version: Some(version.into()),
            ..Self::default()
        }
    }

    /// Canonical key used for aggregation and deduplication
    ///
    /// The package URL when present, otherwise the non-empty coordinates joined
    /// with `:` in group/name/version/classifier/extension order.
    #[must_use]
    pub fn key(&self) -> String {
        if let Some(purl) = non_empty(self.package_url.as_deref()) {
            return purl.to_string();
        }

        let parts: Vec<&str> = [
            &self.group,
            &self.name,
            &self.version,
            &self.classifier,
            &self.extension,
        ]
        .into_iter()
        .filter_map(|part| non_empty(part.as_deref()))
        .collect();

        if parts.is_empty() {
            "unknown-component".to_string()
        } else {
            parts.join(":")
        }
    }

    /// Short human-readable name (`name version`), falling back to the key
    #[must_use]
    pub fn display_name(&self) -> String {
        match (
            non_empty(self.name.as_deref()),
            non_empty(self.version.as_deref()),
        ) {
            (Some(name), Some(version)) => format!("{name} {version}"),
            (Some(name), None) => name.to_string(),
            _ => self.key(),
        }
    }
}

impl fmt::Display for ComponentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A single policy violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Stable violation identifier
    pub violation_id: String,
    /// Name of the violated policy
    pub policy_name: String,
    /// Offending component
    #[serde(alias = "componentIdentifier")]
    pub component: ComponentIdentifier,
    /// Policy severity
    #[serde(default)]
    pub severity: i64,
    /// CVSS score
    #[serde(default)]
    pub cvss_score: Option<f64>,
    /// CVE identifier
    #[serde(default)]
    pub cve_code: Option<String>,
    /// Policy threat level
    #[serde(default)]
    pub threat_level: i64,
    /// First detection date
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub detected_date: Option<DateTime<Utc>>,
    /// Last scan date
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub last_scan_date: Option<DateTime<Utc>>,
    /// Stage the scan ran in
    #[serde(default)]
    pub scan_stage: Option<String>,
    /// Licenses declared by the component
    #[serde(default)]
    pub declared_licenses: Vec<String>,
    /// Licenses observed in the component sources
    #[serde(default)]
    pub observed_licenses: Vec<String>,
    /// Licenses in effect after overrides
    #[serde(default)]
    pub effective_licenses: Vec<String>,
    /// Suggested remediation
    #[serde(default)]
    pub recommended_remediation: Option<String>,
    /// Paths where the component was found
    #[serde(default)]
    pub file_occurrences: Vec<String>,
    /// Constraint that caused the violation
    #[serde(default)]
    pub reason: Option<String>,
}

impl Violation {
    /// Create violation with the required fields
    #[inline]
    #[must_use]
    pub fn new(
        violation_id: impl Into<String>,
        policy_name: impl Into<String>,
        component: ComponentIdentifier,
    ) -> Self {
        Self {
            violation_id: violation_id.into(),
            policy_name: policy_name.into(),
            component,
            severity: 0,
            cvss_score: None,
            cve_code: None,
            threat_level: 0,
            detected_date: None,
            last_scan_date: None,
            scan_stage: None,
            declared_licenses: Vec::new(),
            observed_licenses: Vec::new(),
            effective_licenses: Vec::new(),
            recommended_remediation: None,
            file_occurrences: Vec::new(),
            reason: None,
        }
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: i64) -> Self {
        self.severity = severity;
        self
    }

    /// With threat level
    #[inline]
    #[must_use]
    pub fn with_threat_level(mut self, threat_level: i64) -> Self {
        self.threat_level = threat_level;
        self
    }

    /// With CVSS score and CVE code
    #[inline]
    #[must_use]
    pub fn with_cve(mut self, cve_code: impl Into<String>, cvss_score: f64) -> Self {
        self.cve_code = Some(cve_code.into());
        self.cvss_score = Some(cvss_score);
        self
    }

    /// With detection and last-scan dates
    #[inline]
    #[must_use]
    pub fn with_dates(mut self, detected: DateTime<Utc>, last_scan: DateTime<Utc>) -> Self {
        self.detected_date = Some(detected);
        self.last_scan_date = Some(last_scan);
        self
    }

    /// With scan stage
    #[inline]
    #[must_use]
    pub fn with_scan_stage(mut self, stage: impl Into<String>) -> Self {
        self.scan_stage = Some(stage.into());
        self
    }

    /// Licenses relevant to the violation
    ///
    /// Effective licenses when known, otherwise the union of declared and
    /// observed licenses in first-seen order.
    #[must_use]
    pub fn licenses(&self) -> Vec<String> {
        if !self.effective_licenses.is_empty() {
            return self.effective_licenses.clone();
        }
        let mut licenses: Vec<String> = Vec::new();
        for license in self.declared_licenses.iter().chain(&self.observed_licenses) {
            if !licenses.contains(license) {
                licenses.push(license.clone());
            }
        }
        licenses
    }

    /// Value of an intrinsic attribute
    ///
    /// Context attributes ([`Attribute::Application`], [`Attribute::Organization`])
    /// are not carried by violations and always yield `None`.
    #[must_use]
    pub fn attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        match attribute {
            Attribute::ViolationId => Some(AttributeValue::Text(self.violation_id.clone())),
            Attribute::PolicyName => Some(AttributeValue::Text(self.policy_name.clone())),
            Attribute::Severity => Some(AttributeValue::Integer(self.severity)),
            Attribute::CvssScore => self.cvss_score.map(AttributeValue::Number),
            Attribute::CveCode => self.cve_code.clone().map(AttributeValue::Text),
            Attribute::ThreatLevel => Some(AttributeValue::Integer(self.threat_level)),
            Attribute::DetectedDate => self.detected_date.map(AttributeValue::Date),
            Attribute::LastScanDate => self.last_scan_date.map(AttributeValue::Date),
            Attribute::ScanStage => self.scan_stage.clone().map(AttributeValue::Text),
            Attribute::Component => Some(AttributeValue::Text(self.component.key())),
            Attribute::Licenses => {
                let licenses = self.licenses();
                (!licenses.is_empty()).then_some(AttributeValue::List(licenses))
            }
            Attribute::Remediation => self
                .recommended_remediation
                .clone()
                .map(AttributeValue::Text),
            Attribute::FileOccurrences => (!self.file_occurrences.is_empty())
                .then(|| AttributeValue::List(self.file_occurrences.clone())),
            Attribute::Application | Attribute::Organization => None,
        }
    }
}

/// Parse a violation document
///
/// Accepts either a bare JSON array or an object with a `violations` array.
///
/// # Errors
/// Returns the underlying JSON error when the document matches neither shape.
pub fn parse_violations(json: &str) -> Result<Vec<Violation>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Bare(Vec<Violation>),
        Wrapped { violations: Vec<Violation> },
    }

    Ok(match serde_json::from_str::<Document>(json)? {
        Document::Bare(violations) | Document::Wrapped { violations } => violations,
    })
}

mod flexible_date {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Millis(millis)) => DateTime::from_timestamp_millis(millis)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}"))),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|date| Some(date.with_timezone(&Utc)))
                .map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn component_key_prefers_purl() {
        let mut component = ComponentIdentifier::from_coordinates("org.acme", "lib-a", "1.0");
        assert_eq!(component.key(), "org.acme:lib-a:1.0");

        component.package_url = Some("pkg:maven/org.acme/lib-a@1.0".to_string());
        assert_eq!(component.key(), "pkg:maven/org.acme/lib-a@1.0");
    }

    #[test]
    fn component_key_skips_blank_coordinates() {
        let component = ComponentIdentifier {
            group: Some(" ".to_string()),
            name: Some("lib-a".to_string()),
            version: Some("2.1".to_string()),
            extension: Some("jar".to_string()),
            ..ComponentIdentifier::default()
        };
        assert_eq!(component.key(), "lib-a:2.1:jar");
        assert_eq!(component.display_name(), "lib-a 2.1");
    }

    #[test]
    fn empty_component_has_placeholder_key() {
        assert_eq!(ComponentIdentifier::default().key(), "unknown-component");
    }

    #[test]
    fn parse_wrapped_and_bare_documents() {
        let bare = r#"[{"violationId":"v1","policyName":"CM-Security","component":{"packageUrl":"pkg:npm/a@1"},"severity":9}]"#;
        let wrapped = format!(r#"{{"violations":{bare}}}"#);

        let from_bare = parse_violations(bare).unwrap();
        let from_wrapped = parse_violations(&wrapped).unwrap();

        assert_eq!(from_bare, from_wrapped);
        assert_eq!(from_bare[0].severity, 9);
        assert_eq!(from_bare[0].component.key(), "pkg:npm/a@1");
    }

    #[test]
    fn dates_accept_millis_and_rfc3339() {
        let json = r#"[{
            "violationId": "v1",
            "policyName": "CM-License",
            "componentIdentifier": {"name": "lib"},
            "detectedDate": 1700000000000,
            "lastScanDate": "2024-03-01T10:00:00Z"
        }]"#;
        let violation = &parse_violations(json).unwrap()[0];

        assert_eq!(
            violation.detected_date,
            Utc.timestamp_millis_opt(1_700_000_000_000).single()
        );
        assert_eq!(
            violation.last_scan_date,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn licenses_fall_back_to_declared_and_observed() {
        let mut violation = Violation::new("v1", "CM-License", ComponentIdentifier::from_purl("p"));
        violation.declared_licenses = vec!["MIT".into(), "GPL-3.0".into()];
        violation.observed_licenses = vec!["GPL-3.0".into(), "BSD-2-Clause".into()];
        assert_eq!(violation.licenses(), vec!["MIT", "GPL-3.0", "BSD-2-Clause"]);

        violation.effective_licenses = vec!["GPL-3.0".into()];
        assert_eq!(violation.licenses(), vec!["GPL-3.0"]);
    }

    #[test]
    fn attributes_cover_intrinsic_fields() {
        let violation = Violation::new("v9", "CM-Security", ComponentIdentifier::from_purl("p"))
            .with_severity(8)
            .with_cve("CVE-2024-1", 9.1);

        assert_eq!(
            violation.attribute(Attribute::ViolationId),
            Some(AttributeValue::Text("v9".into()))
        );
        assert_eq!(
            violation.attribute(Attribute::CvssScore),
            Some(AttributeValue::Number(9.1))
        );
        assert_eq!(violation.attribute(Attribute::Remediation), None);
        assert_eq!(violation.attribute(Attribute::Application), None);
    }
}
