//! Per-connection guards
//!
//! A connection runs one command at a time and holds at most one open
//! transaction. Both are enforced with a flag acquired by compare-and-swap.
//! A caller that finds a flag held retries with exponential backoff plus
//! jitter, then gives up with `ConnectionError::Busy`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use super::errors::{ConnectionError, ConnectionResult};
use super::Database;
use crate::commit::{CommitOutcome, Transaction};
use crate::position::Position;

const MAX_BACKOFF_MS: u64 = 250;

/// Held flag, released on drop
struct Held<'a>(&'a AtomicBool);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Connection {
    db: Arc<Database>,
    executing: AtomicBool,
    in_transaction: AtomicBool,
    attempts: u32,
    base_ms: u64,
}

impl Connection {
    pub fn new(db: Arc<Database>) -> Self {
        let attempts = db.config().lock_retry_attempts;
        let base_ms = db.config().lock_retry_base_ms;
        Self {
            db,
            executing: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            attempts,
            base_ms,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Runs `f` as this connection's only command in flight.
    pub fn execute<T>(&self, f: impl FnOnce(&Database) -> T) -> ConnectionResult<T> {
        let _held = self.acquire(&self.executing, "execution")?;
        Ok(f(&self.db))
    }

    /// Opens this connection's transaction.
    ///
    /// The guard rolls back on drop unless committed.
    pub fn begin(&self, role: Position, user: Position) -> ConnectionResult<TransactionGuard<'_>> {
        let held = self.acquire(&self.in_transaction, "transaction")?;
        let tx = self.execute(|db| db.begin(role, user))??;
        Ok(TransactionGuard {
            conn: self,
            tx: Some(tx),
            _held: held,
        })
    }

    fn acquire<'a>(&self, flag: &'a AtomicBool, guard: &'static str) -> ConnectionResult<Held<'a>> {
        for attempt in 0..self.attempts {
            if flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Held(flag));
            }
            if attempt + 1 < self.attempts {
                thread::sleep(self.backoff(attempt));
            }
        }
        Err(ConnectionError::Busy {
            guard,
            attempts: self.attempts,
        })
    }

    /// `base_ms * 2^attempt`, capped, plus up to `base_ms` of jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.base_ms.saturating_mul(1_u64 << attempt.min(31)).min(MAX_BACKOFF_MS);
        let jitter = rand::thread_rng().gen_range(0..=self.base_ms);
        Duration::from_millis(raw + jitter)
    }
}

/// An open transaction bound to its connection.
pub struct TransactionGuard<'a> {
    conn: &'a Connection,
    tx: Option<Transaction>,
    _held: Held<'a>,
}

impl TransactionGuard<'_> {
    pub fn commit(mut self) -> ConnectionResult<CommitOutcome> {
        let Some(tx) = self.tx.take() else {
            unreachable!("transaction taken before commit");
        };
        Ok(self.conn.execute(|db| db.commit(tx))??)
    }

    pub fn rollback(mut self) {
        if let Some(tx) = self.tx.take() {
            self.conn.db.rollback(tx);
        }
    }
}

impl Deref for TransactionGuard<'_> {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        match &self.tx {
            Some(tx) => tx,
            None => unreachable!("transaction guard used after commit"),
        }
    }
}

impl DerefMut for TransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Transaction {
        match &mut self.tx {
            Some(tx) => tx,
            None => unreachable!("transaction guard used after commit"),
        }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.conn.db.rollback(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::observability::{Level, Logger};
    use crate::physical::TableDef;
    use tempfile::TempDir;

    fn connection(dir: &TempDir) -> Connection {
        let mut config = DatabaseConfig::new(dir.path());
        config.lock_retry_attempts = 2;
        config.lock_retry_base_ms = 1;
        let db = Database::open(config, Logger::memory(Level::Trace)).unwrap();
        Connection::new(Arc::new(db))
    }

    #[test]
    fn test_second_transaction_is_busy() {
        let temp_dir = TempDir::new().unwrap();
        let conn = connection(&temp_dir);

        let tx = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
        let err = conn
            .begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER)
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Busy { guard: "transaction", attempts: 2 }));

        drop(tx);
        assert!(conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).is_ok());
    }

    #[test]
    fn test_nested_execute_is_busy() {
        let temp_dir = TempDir::new().unwrap();
        let conn = connection(&temp_dir);
        let inner = conn.execute(|_| conn.execute(|_| ())).unwrap();
        assert!(matches!(inner, Err(ConnectionError::Busy { guard: "execution", .. })));
    }

    #[test]
    fn test_guard_commits_and_releases() {
        let temp_dir = TempDir::new().unwrap();
        let conn = connection(&temp_dir);

        let mut tx = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
        let table = tx.add(TableDef { name: "T".into() });
        let outcome = tx.commit().unwrap();
        assert!(outcome.catalog.table(outcome.resolve(table).unwrap()).is_some());

        let tx = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
        tx.rollback();
        assert!(conn.database().logger().lines().iter().any(|l| l.contains("ROLLBACK")));
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = connection(&temp_dir);
        conn.base_ms = 10;
        assert!(conn.backoff(0) <= Duration::from_millis(20));
        assert!(conn.backoff(3) >= Duration::from_millis(80));
        assert!(conn.backoff(20) <= Duration::from_millis(MAX_BACKOFF_MS + 10));
    }
}
