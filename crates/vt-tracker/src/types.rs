//! Tracker-neutral ticket types
//!
//! Core code speaks these types only; [`crate::JiraClient`] renders them to
//! and from the Jira REST v2 dialect.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Custom field values keyed by tracker field id, in payload order
pub type FieldValues = IndexMap<String, Value>;

/// Fields written when creating or updating a ticket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketFields {
    pub project_key: String,
    pub issue_type: String,
    pub summary: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Resolved custom field values
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom: FieldValues,
}

impl TicketFields {
    /// Create ticket fields
    #[inline]
    #[must_use]
    pub fn new(
        project_key: impl Into<String>,
        issue_type: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            issue_type: issue_type.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With priority name
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Option<String>) -> Self {
        self.priority = priority;
        self
    }

    /// With custom field value
    #[inline]
    #[must_use]
    pub fn with_custom(mut self, field_id: impl Into<String>, value: Value) -> Self {
        self.custom.insert(field_id.into(), value);
        self
    }
}

/// Ticket as observed through a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Human-facing key (e.g. `SEC-12`)
    pub key: String,
    pub summary: String,
    /// Current workflow status name
    pub status: String,
    pub issue_type: String,
    /// Parent key for sub-tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Requested custom field values
    #[serde(default)]
    pub fields: FieldValues,
    /// Keys of existing sub-tasks
    #[serde(default)]
    pub subtasks: Vec<String>,
}

impl Ticket {
    /// Text of a field value, when it is a string or an option object
    #[must_use]
    pub fn field_text(&self, field_id: &str) -> Option<&str> {
        match self.fields.get(field_id)? {
            Value::String(text) => Some(text.as_str()),
            Value::Object(map) => map.get("value").or_else(|| map.get("name"))?.as_str(),
            _ => None,
        }
    }
}

/// Workflow transition available on a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Status the ticket lands in after the transition
    pub to_status: String,
}

impl Transition {
    /// Create transition
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, to_status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            to_status: to_status.into(),
        }
    }
}

/// Field schema as reported by the tracker catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Schema type (`string`, `number`, `date`, `datetime`, `option`, `array`, ...)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Item type for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
    /// Full custom type id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

/// One field from the tracker catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<FieldSchema>,
}

impl TrackerField {
    /// Create catalog field
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            custom: true,
            schema: Some(FieldSchema {
                kind: kind.into(),
                items: None,
                custom: None,
            }),
        }
    }

    /// With array item type
    #[inline]
    #[must_use]
    pub fn with_items(mut self, items: impl Into<String>) -> Self {
        self.schema.get_or_insert_with(FieldSchema::default).items = Some(items.into());
        self
    }

    /// With custom type id
    #[inline]
    #[must_use]
    pub fn with_custom_type(mut self, custom: impl Into<String>) -> Self {
        self.schema.get_or_insert_with(FieldSchema::default).custom = Some(custom.into());
        self
    }
}

/// Structured search, rendered to JQL by REST clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub project_key: String,
    pub issue_type: String,
    /// Restrict to sub-tasks of this parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Custom field id and the value it must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_equals: Option<(String, String)>,
    /// Text the summary must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_contains: Option<String>,
    /// Custom field ids to return with each ticket
    #[serde(default)]
    pub fields: Vec<String>,
}

impl SearchQuery {
    /// Create query scoped to project and issue type
    #[inline]
    #[must_use]
    pub fn new(project_key: impl Into<String>, issue_type: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            issue_type: issue_type.into(),
            ..Self::default()
        }
    }

    /// Restricted to sub-tasks of a parent
    #[inline]
    #[must_use]
    pub fn under_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// With a custom field clause
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.field_equals = Some((field_id.into(), value.into()));
        self
    }

    /// With a summary text clause
    #[inline]
    #[must_use]
    pub fn with_summary(mut self, text: impl Into<String>) -> Self {
        self.summary_contains = Some(text.into());
        self
    }

    /// Also return these custom fields
    #[inline]
    #[must_use]
    pub fn returning(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Render as JQL
    #[must_use]
    pub fn to_jql(&self) -> String {
        let mut clauses = vec![
            format!("project = \"{}\"", escape_jql(&self.project_key)),
            format!("issuetype = \"{}\"", escape_jql(&self.issue_type)),
        ];
        if let Some(parent) = &self.parent {
            clauses.push(format!("parent = \"{}\"", escape_jql(parent)));
        }
        if let Some((field_id, value)) = &self.field_equals {
            clauses.push(format!("{} ~ \"{}\"", jql_field_ref(field_id), escape_jql(value)));
        }
        if let Some(text) = &self.summary_contains {
            clauses.push(format!("summary ~ \"\\\"{}\\\"\"", escape_jql(text)));
        }
        format!("{} ORDER BY created ASC", clauses.join(" AND "))
    }
}

fn jql_field_ref(field_id: &str) -> String {
    match field_id.strip_prefix("customfield_") {
        Some(number) => format!("cf[{number}]"),
        None => format!("\"{}\"", escape_jql(field_id)),
    }
}

fn escape_jql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
