//! Log file error types
//!
//! Error codes:
//! - PHYSLOG_LOG_APPEND_FAILED (ERROR severity)
//! - PHYSLOG_LOG_FSYNC_FAILED (FATAL severity)
//! - PHYSLOG_LOG_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Write to the log failed
    AppendFailed,
    /// fsync of the log failed
    FsyncFailed,
    /// Log bytes are unreadable or inconsistent
    Corruption,
}

impl LogErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::AppendFailed => "PHYSLOG_LOG_APPEND_FAILED",
            LogErrorCode::FsyncFailed => "PHYSLOG_LOG_FSYNC_FAILED",
            LogErrorCode::Corruption => "PHYSLOG_LOG_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::AppendFailed => Severity::Error,
            LogErrorCode::FsyncFailed => Severity::Fatal,
            LogErrorCode::Corruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    /// Where the failure happened, e.g. a byte offset
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::AppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Append refused without touching the file
    pub fn append_refused(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::AppendFailed,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::FsyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Fatal errors mean the log must not be used further
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type LogResult<T> = Result<T, LogError>;
