//! Domain model: issues as cached by the client and the gateway's stats.

pub mod issue;
pub mod stats;

pub use issue::{Classification, Issue, IssueId, IssueStatus, ParseEnumError};
pub use stats::{Bucket, Stats, priority_rank};
