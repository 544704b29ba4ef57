//! Build status annotation
//!
//! Posts one pass/fail build status for a commit to the source-control host.
//! The upsert is keyed, so re-posting the same result is idempotent. One
//! retry is made on transient failures.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod reporter;

pub use error::StatusError;
pub use reporter::{BitbucketReporter, BuildState, BuildStatus, DEFAULT_STATUS_KEY};
