//! Issue tracker boundary
//!
//! Provides:
//! - [`TicketClient`]: the transport contract used by reconciliation
//! - [`JiraClient`]: a Jira REST v2 implementation
//! - [`RetryPolicy`] and [`Throttle`]: bounded backoff with one shared
//!   rate-limit window per run
//! - [`ResilientClient`]: any client wrapped with both
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vt_tracker::{JiraClient, ResilientClient, RetryPolicy};
//!
//! let jira = JiraClient::new(&connection, Duration::from_secs(30))?;
//! let client = ResilientClient::new(Arc::new(jira), RetryPolicy::default());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod error;
pub mod jira;
pub mod resilient;
pub mod retry;
pub mod throttle;
pub mod types;

pub use client::TicketClient;
pub use error::{TrackerError, TrackerResult};
pub use jira::JiraClient;
pub use resilient::ResilientClient;
pub use retry::RetryPolicy;
pub use throttle::Throttle;
pub use types::{
    FieldSchema, FieldValues, SearchQuery, Ticket, TicketFields, TrackerField, Transition,
};
