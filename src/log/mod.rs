//! File-backed append-only log
//!
//! A log is a 32-byte header followed by encoded physicals. A physical's
//! position is the byte offset of its tag, so the log length is always the
//! position the next record will get.

mod errors;
mod header;
mod reader;
mod writer;

pub use errors::{LogError, LogErrorCode, LogResult};
pub use header::{LogHeader, HEADER_LEN, MAGIC};
pub use reader::LogReader;
pub use writer::LogWriter;
