//! Typed lifecycle events
//!
//! Every line the logger writes names one of these.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Log opened and catalog rebuilt
    DatabaseOpen,
    /// End-of-file marker written
    DatabaseClose,
    ConfigLoaded,

    // Replay
    ReplayStart,
    ReplayComplete,

    // Commit path
    /// Batch appended and catalog published
    CommitComplete,
    /// Validation found a conflict with a concurrent commit
    CommitConflict,
    /// Structural or installer error, nothing written
    CommitRejected,
    Rollback,

    // Log file
    LogAppend,
    LogTruncate,
    /// Integrity check failed (FATAL)
    LogCorruption,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::DatabaseOpen => "DATABASE_OPEN",
            Event::DatabaseClose => "DATABASE_CLOSE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ReplayStart => "REPLAY_START",
            Event::ReplayComplete => "REPLAY_COMPLETE",
            Event::CommitComplete => "COMMIT_COMPLETE",
            Event::CommitConflict => "COMMIT_CONFLICT",
            Event::CommitRejected => "COMMIT_REJECTED",
            Event::Rollback => "ROLLBACK",
            Event::LogAppend => "LOG_APPEND",
            Event::LogTruncate => "LOG_TRUNCATE",
            Event::LogCorruption => "LOG_CORRUPTION",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::LogCorruption)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
