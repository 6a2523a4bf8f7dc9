//! Sequential log reader with integrity checks
//!
//! Any inconsistency is a corruption error and replay stops there:
//! - undecodable record bytes
//! - a transaction marker followed by fewer (or other) physicals than it counts
//! - an end-of-file marker whose checksum does not match the bytes before it
//! - a reference to a position at or after the referencing record
//!
//! There is no skipping and no repair.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{LogError, LogResult};
use super::header::{LogHeader, HEADER_LEN};
use crate::codec;
use crate::physical::{Body, Control, Physical};
use crate::position::Position;

pub struct LogReader {
    path: PathBuf,
    bytes: Vec<u8>,
    header: LogHeader,
    offset: usize,
    /// Marker of the transaction being read and how many records it still owns
    open: Option<(Position, i64)>,
}

impl LogReader {
    pub fn open(path: &Path) -> LogResult<Self> {
        let bytes = fs::read(path).map_err(|e| {
            LogError::corruption(format!("Failed to read log file {}: {}", path.display(), e))
        })?;
        let header = LogHeader::decode(&bytes)?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            header,
            offset: HEADER_LEN as usize,
            open: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Position of the next record
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    /// Reads the next physical.
    ///
    /// Returns `Ok(None)` at a clean end of the log.
    pub fn read_next(&mut self) -> LogResult<Option<Physical>> {
        if self.offset >= self.bytes.len() {
            if let Some((marker, remaining)) = self.open {
                if remaining > 0 {
                    return Err(LogError::corruption_at_offset(
                        self.offset as u64,
                        format!("log ends with {} records of transaction {} missing", remaining, marker),
                    ));
                }
            }
            return Ok(None);
        }

        let at = self.offset as u64;
        let (ph, len) = codec::decode(&self.bytes, self.offset, self.header.format)
            .map_err(|e| LogError::corruption_at_offset(at, e.to_string()))?;

        ph.check_no_forward_reference()
            .map_err(|e| LogError::corruption_at_offset(at, e.to_string()))?;
        self.check_segment(&ph)?;

        if let Body::Control(Control::EndOfFile(eof)) = &ph.body {
            let expected = crc32fast::hash(&self.bytes[..self.offset]);
            if eof.checksum != expected {
                return Err(LogError::corruption_at_offset(
                    at,
                    format!(
                        "end-of-file checksum mismatch: stored {:#010x}, computed {:#010x}",
                        eof.checksum, expected
                    ),
                ));
            }
        }

        self.offset += len;
        Ok(Some(ph))
    }

    fn check_segment(&mut self, ph: &Physical) -> LogResult<()> {
        let at = ph.pos.value();
        let remaining = self.open.map(|(_, n)| n).unwrap_or(0);

        match &ph.body {
            Body::Control(Control::Transaction(marker)) => {
                if remaining > 0 {
                    return Err(LogError::corruption_at_offset(
                        at,
                        format!("transaction starts with {} records of the previous one missing", remaining),
                    ));
                }
                if ph.segment != ph.pos {
                    return Err(LogError::corruption_at_offset(
                        at,
                        format!("transaction marker names segment {}", ph.segment),
                    ));
                }
                if marker.nrecs < 0 {
                    return Err(LogError::corruption_at_offset(
                        at,
                        format!("negative record count {}", marker.nrecs),
                    ));
                }
                self.open = Some((ph.pos, marker.nrecs));
            }
            Body::Control(Control::EndOfFile(_)) => {
                if remaining > 0 {
                    return Err(LogError::corruption_at_offset(at, "end-of-file marker inside a transaction"));
                }
                self.open = None;
            }
            _ => {
                let Some((marker, n)) = self.open.filter(|(_, n)| *n > 0) else {
                    return Err(LogError::corruption_at_offset(at, "record outside any transaction"));
                };
                if ph.segment != marker {
                    return Err(LogError::corruption_at_offset(
                        at,
                        format!("record belongs to segment {}, expected {}", ph.segment, marker),
                    ));
                }
                self.open = Some((marker, n - 1));
            }
        }
        Ok(())
    }

    /// Reads every remaining physical.
    pub fn read_all(&mut self) -> LogResult<Vec<Physical>> {
        let mut out = Vec::new();
        while let Some(ph) = self.read_next()? {
            out.push(ph);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogErrorCode, LogWriter};
    use crate::physical::{EndOfFile, TableDef, TransactionMarker};
    use tempfile::TempDir;

    /// Bytes of a one-table transaction placed at `base`
    fn transaction(base: u64) -> (Vec<u8>, u64) {
        let mut marker = Physical::new(
            Position::new(base),
            TransactionMarker::new(1, Position::DEFAULT_ROLE, Position::DEFAULT_USER),
        );
        marker.segment = marker.pos;
        let mut bytes = codec::encode(&marker);
        let mut table = Physical::new(
            Position::new(base + bytes.len() as u64),
            TableDef { name: "T".into() },
        );
        table.segment = marker.pos;
        bytes.extend(codec::encode(&table));
        (bytes, table.pos.value())
    }

    #[test]
    fn test_reads_back_appended_transaction() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("physlog.log");
        let mut writer = LogWriter::open(&path).unwrap();
        let (bytes, table_pos) = transaction(writer.length());
        writer.append(&bytes).unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        let all = reader.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pos, Position::new(HEADER_LEN));
        assert_eq!(all[1].pos, Position::new(table_pos));
        assert_eq!(all[1].segment, all[0].pos);
    }

    #[test]
    fn test_end_of_file_checksum_verified() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("physlog.log");
        let mut writer = LogWriter::open(&path).unwrap();
        let (bytes, _) = transaction(writer.length());
        writer.append(&bytes).unwrap();

        let all = fs::read(&path).unwrap();
        let good = Physical::new(
            Position::new(writer.length()),
            EndOfFile {
                checksum: crc32fast::hash(&all),
            },
        );
        writer.append(&codec::encode(&good)).unwrap();
        assert_eq!(LogReader::open(&path).unwrap().read_all().unwrap().len(), 3);

        let bad = Physical::new(Position::new(writer.length()), EndOfFile { checksum: 7 });
        writer.append(&codec::encode(&bad)).unwrap();
        let err = LogReader::open(&path).unwrap().read_all().unwrap_err();
        assert_eq!(err.code(), LogErrorCode::Corruption);
    }

    #[test]
    fn test_torn_transaction_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("physlog.log");
        let mut writer = LogWriter::open(&path).unwrap();
        let (bytes, table_pos) = transaction(writer.length());
        let cut = (table_pos - HEADER_LEN) as usize;
        writer.append(&bytes[..cut]).unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        assert!(reader.read_next().is_err());
    }

    #[test]
    fn test_garbage_bytes_are_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("physlog.log");
        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&[0xff, 0, 0]).unwrap();

        let err = LogReader::open(&path).unwrap().read_next().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.details(), Some("byte_offset: 32"));
    }
}
