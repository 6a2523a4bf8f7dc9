//! Database: replay, optimistic commit, close
//!
//! A `Database` owns the log writer and the in-memory state rebuilt from the
//! log: every durable physical in order and the catalog they install.
//!
//! # Commit
//!
//! One mutex serializes commits. Under it a transaction is
//! 1. validated against every physical committed since its snapshot,
//! 2. linearized into a batch at the current log end,
//! 3. installed into a copy of the current catalog,
//! 4. appended and synced as one write,
//! 5. published.
//!
//! Any failure before step 5 leaves the log and the published catalog as they
//! were. Readers never take the mutex for long: they clone the catalog `Arc`.

mod connection;
mod errors;

pub use connection::{Connection, TransactionGuard};
pub use errors::{ConnectionError, ConnectionResult, DatabaseError, DatabaseResult};

use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::catalog::{Catalog, InstallContext};
use crate::codec;
use crate::commit::{linearize, CommitOutcome, Transaction};
use crate::config::DatabaseConfig;
use crate::conflict::{conflicts, read_check, ConflictContext, ConflictError};
use crate::log::{LogError, LogReader, LogWriter};
use crate::observability::{Event, Logger, MetricsRegistry, MetricsSnapshot};
use crate::physical::{Body, EndOfFile, Physical, TransactionMarker};
use crate::position::{FixupTable, Position};

struct Shared {
    writer: LogWriter,
    /// Every durable physical, in log order
    physicals: Vec<Physical>,
    catalog: Arc<Catalog>,
    closed: bool,
}

pub struct Database {
    config: DatabaseConfig,
    logger: Logger,
    metrics: MetricsRegistry,
    shared: Mutex<Shared>,
}

impl Database {
    /// Opens the log named by `config` and rebuilds the catalog from it.
    ///
    /// A missing log is created empty. Any integrity failure stops the open.
    pub fn open(config: DatabaseConfig, logger: Logger) -> DatabaseResult<Self> {
        config.validate()?;
        let path = config.log_path();

        let mut writer = LogWriter::open(&path)?;
        writer.set_sync_on_append(config.sync_on_append);

        logger.info(Event::ReplayStart, &[("path", &path.display().to_string())]);
        let metrics = MetricsRegistry::new();
        let (physicals, catalog) = match replay(&mut LogReader::open(&path)?) {
            Ok(state) => state,
            Err(e) => {
                let code = e.code();
                logger.event(Event::LogCorruption, &[("code", code), ("error", &e.to_string())]);
                return Err(e);
            }
        };
        metrics.add_replayed(physicals.len() as u64);
        logger.info(
            Event::ReplayComplete,
            &[
                ("length", &writer.length().to_string()),
                ("physicals", &physicals.len().to_string()),
            ],
        );
        logger.info(
            Event::DatabaseOpen,
            &[
                ("database_id", &writer.header().database_id.to_string()),
                ("format", &writer.header().format.as_u32().to_string()),
            ],
        );

        Ok(Self {
            config,
            logger,
            metrics,
            shared: Mutex::new(Shared {
                writer,
                physicals,
                catalog: Arc::new(catalog),
                closed: false,
            }),
        })
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, Shared>> {
        self.shared.lock().map_err(|_| DatabaseError::Poisoned)
    }

    fn lock_open(&self) -> DatabaseResult<MutexGuard<'_, Shared>> {
        let shared = self.lock()?;
        if shared.closed {
            return Err(DatabaseError::Closed);
        }
        Ok(shared)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Latest committed catalog
    pub fn catalog(&self) -> DatabaseResult<Arc<Catalog>> {
        Ok(Arc::clone(&self.lock()?.catalog))
    }

    /// Log length, equal to the position the next record will get
    pub fn length(&self) -> DatabaseResult<u64> {
        Ok(self.lock()?.writer.length())
    }

    /// Copy of every durable physical, in log order
    pub fn physicals(&self) -> DatabaseResult<Vec<Physical>> {
        Ok(self.lock()?.physicals.clone())
    }

    /// Starts a transaction acting as `role` and `user`.
    pub fn begin(&self, role: Position, user: Position) -> DatabaseResult<Transaction> {
        let shared = self.lock_open()?;
        if shared.catalog.role(role).is_none() {
            return Err(DatabaseError::UnknownRole(role));
        }
        if shared.catalog.user(user).is_none() {
            return Err(DatabaseError::UnknownUser(user));
        }
        Ok(Transaction::new(
            role,
            user,
            Position::new(shared.writer.length()),
            Arc::clone(&shared.catalog),
        ))
    }

    /// Validates, writes and publishes `tx`.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a concurrent commit invalidated the transaction
    /// - `Install` if a physical violates the catalog's rules
    /// - `Position` if the write-set references something it cannot
    /// - `Log` if the append fails; the log is cut back first
    ///
    /// On error nothing is written and nothing is published.
    pub fn commit(&self, tx: Transaction) -> DatabaseResult<CommitOutcome> {
        let mut shared = self.lock_open()?;

        if tx.is_empty() {
            return Ok(CommitOutcome {
                marker: None,
                length: shared.writer.length(),
                fixup: FixupTable::new(),
                catalog: Arc::clone(&shared.catalog),
            });
        }

        if let Err(conflict) = self.validate(&tx, &shared) {
            if conflict.code().is_read_conflict() {
                self.metrics.increment_read_conflicts();
            } else {
                self.metrics.increment_write_conflicts();
            }
            self.metrics.increment_aborts();
            self.logger.warn(
                Event::CommitConflict,
                &[
                    ("code", conflict.code().code()),
                    ("ours", &conflict.ours().to_string()),
                    ("theirs", &conflict.theirs().to_string()),
                    ("marker", &conflict.marker().to_string()),
                ],
            );
            return Err(conflict.into());
        }

        let base = Position::new(shared.writer.length());
        let staged = linearize(tx.pending(), base, TransactionMarker::new(0, tx.role(), tx.user()))
            .map_err(DatabaseError::from)
            .and_then(|batch| {
                let mut next = (*shared.catalog).clone();
                let mut ctx = InstallContext::new(tx.role(), tx.user());
                for ph in &batch.physicals {
                    next.install(ph, &mut ctx)?;
                }
                Ok((batch, next))
            });
        let (batch, next) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                if let DatabaseError::Install(install) = &e {
                    if install.is_constraint() {
                        self.metrics.increment_constraint_violations();
                    }
                }
                self.metrics.increment_aborts();
                self.logger.warn(Event::CommitRejected, &[("code", e.code()), ("error", &e.to_string())]);
                return Err(e);
            }
        };

        if let Err(e) = shared.writer.append(&batch.bytes) {
            self.metrics.increment_aborts();
            // An I/O failure was cut back by the writer; a refusal never touched the file
            if shared.writer.is_torn() {
                self.logger.error(
                    Event::LogTruncate,
                    &[("length", &base.value().to_string()), ("result", "failed")],
                );
            } else if std::error::Error::source(&e).is_some() {
                self.metrics.increment_truncations();
                self.logger.warn(Event::LogTruncate, &[("length", &base.value().to_string())]);
            }
            self.logger.error(Event::CommitRejected, &[("code", e.code().code()), ("error", &e.to_string())]);
            return Err(e.into());
        }
        self.metrics.add_appended(batch.len() as u64, batch.bytes.len() as u64);
        self.logger.trace(
            Event::LogAppend,
            &[("bytes", &batch.bytes.len().to_string()), ("offset", &base.value().to_string())],
        );

        let catalog = Arc::new(next);
        shared.catalog = Arc::clone(&catalog);
        shared.physicals.extend(batch.physicals.iter().cloned());
        let length = shared.writer.length();
        drop(shared);

        self.metrics.increment_commits();
        self.logger.info(
            Event::CommitComplete,
            &[
                ("length", &length.to_string()),
                ("marker", &batch.marker.to_string()),
                ("physicals", &batch.len().to_string()),
            ],
        );

        Ok(CommitOutcome {
            marker: Some(batch.marker),
            length,
            fixup: batch.fixup,
            catalog,
        })
    }

    /// First conflict between `tx` and anything committed since its snapshot
    fn validate(&self, tx: &Transaction, shared: &Shared) -> Result<(), ConflictError> {
        let start = shared.physicals.partition_point(|ph| ph.pos < tx.snapshot());
        let ctx = ConflictContext::new(tx.catalog(), &shared.catalog);

        for theirs in &shared.physicals[start..] {
            if matches!(theirs.body, Body::Control(_)) {
                continue;
            }
            for &read in tx.reads() {
                if let Some(conflict) = read_check(read, theirs, theirs.segment, &ctx) {
                    return Err(conflict);
                }
            }
            for ours in tx.pending() {
                if let Some(conflict) = conflicts(ours, theirs, &ctx) {
                    return Err(conflict);
                }
            }
        }
        Ok(())
    }

    /// Discards `tx`. Nothing it added was ever visible.
    pub fn rollback(&self, tx: Transaction) {
        self.logger.info(
            Event::Rollback,
            &[
                ("pending", &tx.pending().len().to_string()),
                ("snapshot", &tx.snapshot().to_string()),
            ],
        );
    }

    /// Appends the end-of-file marker and refuses further transactions.
    ///
    /// The marker's checksum covers every byte before it, header included.
    pub fn close(&self) -> DatabaseResult<()> {
        let mut shared = self.lock_open()?;
        let bytes = fs::read(shared.writer.path()).map_err(|e| {
            LogError::append_failed(format!("Failed to read log {} for checksum", shared.writer.path().display()), e)
        })?;

        let eof = Physical::new(
            Position::new(shared.writer.length()),
            EndOfFile {
                checksum: crc32fast::hash(&bytes),
            },
        );
        let encoded = codec::encode(&eof);
        shared.writer.append(&encoded)?;
        self.metrics.add_appended(1, encoded.len() as u64);
        shared.physicals.push(eof);
        shared.closed = true;

        self.logger.info(Event::DatabaseClose, &[("length", &shared.writer.length().to_string())]);
        Ok(())
    }
}

/// Reads the whole log and installs it from an empty catalog.
fn replay(reader: &mut LogReader) -> DatabaseResult<(Vec<Physical>, Catalog)> {
    let physicals = reader.read_all()?;
    let mut catalog = Catalog::new();
    let mut ctx = InstallContext::default();
    for ph in &physicals {
        catalog.install(ph, &mut ctx)?;
    }
    Ok((physicals, catalog))
}
