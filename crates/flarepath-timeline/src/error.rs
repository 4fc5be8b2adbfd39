//! Error types for flarepath-timeline.

use thiserror::Error;

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Errors that can occur while building or driving a replay session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    /// A replay buffer cannot be built from an empty event log.
    #[error("event log is empty; nothing to replay")]
    EmptyLog,
}
