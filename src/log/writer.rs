//! Append-only log writer
//!
//! Every append is a single `write_all` of a whole commit batch followed by
//! `sync_all`. A batch that fails to write or sync is cut off again, so the
//! file never ends in a partial batch that was reported as failed.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{LogError, LogResult};
use super::header::{LogHeader, HEADER_LEN};
use crate::codec::LogFormat;

pub struct LogWriter {
    path: PathBuf,
    file: File,
    header: LogHeader,
    /// Byte length of the log, equal to the position of the next record
    length: u64,
    sync_on_append: bool,
    /// Set when a failed append could not be cut off again. The file may end
    /// in bytes past `length`, so nothing more is appended.
    torn: bool,
}

impl LogWriter {
    /// Opens the log at `path`, creating it with a fresh header if missing.
    ///
    /// Parent directories are created as needed.
    pub fn open(path: &Path) -> LogResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    LogError::append_failed(format!("Failed to create log directory: {}", dir.display()), e)
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LogError::append_failed(format!("Failed to open log file: {}", path.display()), e))?;

        let existing = file
            .metadata()
            .map_err(|e| LogError::append_failed("Failed to read log metadata", e))?
            .len();

        let header = if existing == 0 {
            let header = LogHeader::new();
            file.write_all(&header.encode())
                .map_err(|e| LogError::append_failed("Failed to write log header", e))?;
            file.sync_all()
                .map_err(|e| LogError::fsync_failed("fsync failed after writing log header", e))?;
            header
        } else {
            let mut bytes = [0u8; HEADER_LEN as usize];
            file.read_exact(&mut bytes).map_err(|e| {
                LogError::corruption_at_offset(0, format!("Failed to read log header: {}", e))
            })?;
            LogHeader::decode(&bytes)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            length: existing.max(HEADER_LEN),
            sync_on_append: true,
            torn: false,
        })
    }

    pub fn set_sync_on_append(&mut self, sync: bool) {
        self.sync_on_append = sync;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// True once a failed append was left on disk. Reopening the log
    /// verifies the tail.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Appends `bytes` at the end of the log and returns the position they start at.
    ///
    /// # Errors
    ///
    /// - `PHYSLOG_LOG_APPEND_FAILED` if the write fails, the log is in the legacy
    ///   format, or an earlier failed append could not be removed
    /// - `PHYSLOG_LOG_FSYNC_FAILED` if fsync fails (FATAL)
    ///
    /// In both failure cases the log is truncated back to its previous length
    /// first. If that truncation fails too, the writer is torn.
    pub fn append(&mut self, bytes: &[u8]) -> LogResult<u64> {
        if self.header.format != LogFormat::Current {
            return Err(LogError::append_refused(format!(
                "log {} is in a legacy format and is read-only",
                self.path.display()
            )));
        }
        if self.torn {
            return Err(LogError::append_refused(format!(
                "log {} holds a failed append past offset {}; reopen to verify it",
                self.path.display(),
                self.length
            )));
        }

        let start = self.length;
        let written = self
            .file
            .seek(SeekFrom::Start(start))
            .and_then(|_| self.file.write_all(bytes));
        if let Err(e) = written {
            self.cut_back(start);
            return Err(LogError::append_failed(
                format!("Failed to write {} bytes at offset {}", bytes.len(), start),
                e,
            ));
        }

        if self.sync_on_append {
            if let Err(e) = self.file.sync_all() {
                self.cut_back(start);
                return Err(LogError::fsync_failed(
                    format!("fsync failed after append at offset {}", start),
                    e,
                ));
            }
        }

        self.length = start + bytes.len() as u64;
        Ok(start)
    }

    /// Removes a failed append. The error being reported already describes
    /// the failure, so a failed removal only marks the writer torn.
    fn cut_back(&mut self, len: u64) {
        let removed = self.file.set_len(len).and_then(|_| self.file.sync_all());
        if removed.is_err() {
            self.torn = true;
        }
    }

    /// Truncates the log to `len` bytes. Never cuts into the header.
    pub fn truncate_to(&mut self, len: u64) -> LogResult<()> {
        let len = len.max(HEADER_LEN);
        self.file
            .set_len(len)
            .map_err(|e| LogError::append_failed(format!("Failed to truncate log to {} bytes", len), e))?;
        self.file
            .sync_all()
            .map_err(|e| LogError::fsync_failed("fsync failed after truncation", e))?;
        self.length = len;
        self.torn = false;
        Ok(())
    }

    /// Explicit fsync, for callers that disabled sync on append.
    pub fn fsync(&self) -> LogResult<()> {
        self.file
            .sync_all()
            .map_err(|e| LogError::fsync_failed("Explicit log fsync failed", e))
    }
}
