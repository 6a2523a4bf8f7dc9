//! Fixed 32-byte log header
//!
//! ```text
//! [magic "PHYSLOG\0":8][format:u32 BE][database id:16][reserved:4]
//! ```
//!
//! The first physical starts right after the header, so positions below
//! [`HEADER_LEN`] never name a record.

use std::fmt;

use uuid::Uuid;

use super::errors::{LogError, LogResult};
use crate::codec::LogFormat;

pub const MAGIC: [u8; 8] = *b"PHYSLOG\0";
pub const HEADER_LEN: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub format: LogFormat,
    pub database_id: Uuid,
}

impl LogHeader {
    /// Header for a new log in the current format.
    pub fn new() -> Self {
        Self {
            format: LogFormat::Current,
            database_id: Uuid::new_v4(),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0..8].copy_from_slice(&MAGIC);
        out[8..12].copy_from_slice(&self.format.as_u32().to_be_bytes());
        out[12..28].copy_from_slice(self.database_id.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if (bytes.len() as u64) < HEADER_LEN {
            return Err(LogError::corruption_at_offset(
                0,
                format!("log header truncated: {} of {} bytes", bytes.len(), HEADER_LEN),
            ));
        }
        if bytes[0..8] != MAGIC {
            return Err(LogError::corruption_at_offset(0, "bad log magic"));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[8..12]);
        let version = u32::from_be_bytes(version);
        let format = LogFormat::from_u32(version)
            .ok_or_else(|| LogError::corruption_at_offset(8, format!("unknown log format {}", version)))?;
        let database_id = Uuid::from_slice(&bytes[12..28])
            .map_err(|e| LogError::corruption_at_offset(12, format!("bad database id: {}", e)))?;
        Ok(Self { format, database_id })
    }
}

impl Default for LogHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (format {})", self.database_id, self.format.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogErrorCode;

    #[test]
    fn test_header_layout() {
        let header = LogHeader::new();
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], b"PHYSLOG\0");
        assert_eq!(&bytes[8..12], &[0, 0, 0, 2]);
        assert_eq!(&bytes[28..32], &[0, 0, 0, 0]);
        assert_eq!(LogHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_legacy_format_is_recognised() {
        let mut bytes = LogHeader::new().encode();
        bytes[11] = 1;
        assert_eq!(LogHeader::decode(&bytes).unwrap().format, LogFormat::Legacy);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let mut bytes = LogHeader::new().encode();
        bytes[0] = b'X';
        assert_eq!(LogHeader::decode(&bytes).unwrap_err().code(), LogErrorCode::Corruption);
        assert!(LogHeader::decode(&bytes[..10]).is_err());
    }
}
