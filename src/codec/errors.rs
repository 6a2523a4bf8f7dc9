//! Codec error types
//!
//! Error codes:
//! - PHYSLOG_CODEC_TRUNCATED (FATAL severity)
//! - PHYSLOG_CODEC_UNKNOWN_TAG (FATAL severity)
//! - PHYSLOG_CODEC_MALFORMED (FATAL severity)
//! - PHYSLOG_CODEC_LEGACY (FATAL severity)
//!
//! Malformed bytes mean the log cannot be trusted past that point, so every
//! codec error is fatal.

use std::fmt;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorCode {
    /// Record ends before its fields do
    Truncated,
    /// Tag byte names no known physical kind
    UnknownTag,
    /// A field holds an impossible value
    Malformed,
    /// A legacy-format record could not be decoded
    Legacy,
}

impl CodecErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            CodecErrorCode::Truncated => "PHYSLOG_CODEC_TRUNCATED",
            CodecErrorCode::UnknownTag => "PHYSLOG_CODEC_UNKNOWN_TAG",
            CodecErrorCode::Malformed => "PHYSLOG_CODEC_MALFORMED",
            CodecErrorCode::Legacy => "PHYSLOG_CODEC_LEGACY",
        }
    }
}

impl fmt::Display for CodecErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Decoding failure with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    code: CodecErrorCode,
    message: String,
    offset: u64,
}

impl CodecError {
    pub fn truncated(offset: u64, wanted: usize) -> Self {
        Self {
            code: CodecErrorCode::Truncated,
            message: format!("record truncated: needed {} bytes", wanted),
            offset,
        }
    }

    pub fn unknown_tag(offset: u64, tag: u8) -> Self {
        Self {
            code: CodecErrorCode::UnknownTag,
            message: format!("unknown physical tag {}", tag),
            offset,
        }
    }

    pub fn malformed(offset: u64, message: impl Into<String>) -> Self {
        Self {
            code: CodecErrorCode::Malformed,
            message: message.into(),
            offset,
        }
    }

    pub fn legacy(offset: u64, message: impl Into<String>) -> Self {
        Self {
            code: CodecErrorCode::Legacy,
            message: message.into(),
            offset,
        }
    }

    pub fn code(&self) -> CodecErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Byte offset in the log where decoding failed
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (byte_offset: {})",
            self.severity(),
            self.code,
            self.message,
            self.offset
        )
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;
