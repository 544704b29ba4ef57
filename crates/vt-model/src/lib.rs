//! Violation Tickets data model
//!
//! Types shared by every stage of a reconciliation run:
//! - [`Violation`]: one policy violation reported by the upstream evaluation
//! - [`NotificationConfig`]: the versioned, eagerly validated run configuration
//! - [`Attribute`] / [`AttributeValue`]: violation attributes addressable by field mappings
//! - [`CredentialsProvider`]: the narrow credential boundary injected into runners
//!
//! # Example
//!
//! ```rust,ignore
//! use vt_model::{parse_violations, NotificationConfig};
//!
//! let violations = parse_violations(&std::fs::read_to_string("violations.json")?)?;
//! let mut config = NotificationConfig::new("SEC");
//! config.normalize();
//! config.validate()?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod attribute;
pub mod config;
pub mod credentials;
pub mod error;
pub mod violation;

pub use attribute::{Attribute, AttributeValue};
pub use config::{
    parse_document, AggregationMode, ApplicationContext, ConfigFormat, DateFormat,
    FieldMappingEntry, FieldSource, LegacySettings, NotificationConfig, RetrySettings,
    TransitionConfig, TypeOverride, CURRENT_SCHEMA_VERSION,
};
pub use credentials::{
    Auth, Connection, ConnectionEntry, CredentialsProvider, StaticCredentials,
};
pub use error::{ConfigError, CredentialsError};
pub use violation::{parse_violations, ComponentIdentifier, Violation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
