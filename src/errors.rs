//! Shared error severity
//!
//! Every subsystem error reports one of two severities:
//! - ERROR: the operation fails, the database keeps serving
//! - FATAL: an internal invariant is broken, the log must not be used further

use std::fmt;

/// Severity of a physlog error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, database continues
    Error,
    /// Log or commit state is no longer trustworthy
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}
