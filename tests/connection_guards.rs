//! Connection Guard Tests
//!
//! Each connection runs one command and holds one transaction at a time.
//! Many connections share a database; their commits serialize on the log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use physlog::config::DatabaseConfig;
use physlog::database::{Connection, ConnectionError, Database, DatabaseError};
use physlog::observability::{Level, Logger};
use physlog::physical::{ColumnDef, DataType, Insert, TableDef, Value};
use physlog::position::Position;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn database(dir: &TempDir) -> Arc<Database> {
    let mut config = DatabaseConfig::new(dir.path());
    config.lock_retry_attempts = 3;
    config.lock_retry_base_ms = 1;
    Arc::new(Database::open(config, Logger::memory(Level::Warn)).unwrap())
}

/// Table with one integer column; returns (table, column)
fn table(db: &Database) -> (Position, Position) {
    let mut tx = db.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
    let table = tx.add(TableDef { name: "Events".into() });
    let column = tx.add(ColumnDef {
        table,
        name: "n".into(),
        seq: 0,
        data_type: DataType::Integer,
        domain: None,
        default: Value::Null,
        not_null: false,
    });
    let outcome = db.commit(tx).unwrap();
    (outcome.resolve(table).unwrap(), outcome.resolve(column).unwrap())
}

// =============================================================================
// Single Connection
// =============================================================================

/// A second begin on the same connection is busy until the first guard drops.
#[test]
fn test_one_transaction_per_connection() {
    let temp_dir = TempDir::new().unwrap();
    let conn = Connection::new(database(&temp_dir));

    let first = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
    match conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER) {
        Err(ConnectionError::Busy { attempts, .. }) => assert_eq!(attempts, 3),
        Err(other) => panic!("expected busy, got {}", other),
        Ok(_) => panic!("second transaction opened"),
    }
    drop(first);
    conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap().rollback();
}

/// Dropping an uncommitted guard discards its write-set.
#[test]
fn test_dropped_guard_rolls_back() {
    let temp_dir = TempDir::new().unwrap();
    let db = database(&temp_dir);
    let conn = Connection::new(Arc::clone(&db));
    let length = db.length().unwrap();

    {
        let mut tx = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
        tx.add(TableDef { name: "Never".into() });
    }
    assert_eq!(db.length().unwrap(), length);
}

/// Errors from the database surface through the connection unchanged.
#[test]
fn test_database_errors_pass_through() {
    let temp_dir = TempDir::new().unwrap();
    let conn = Connection::new(database(&temp_dir));
    match conn.begin(Position::new(4242), Position::DEFAULT_USER) {
        Err(ConnectionError::Database(DatabaseError::UnknownRole(p))) => assert_eq!(p, Position::new(4242)),
        Err(other) => panic!("expected unknown role, got {}", other),
        Ok(_) => panic!("unknown role accepted"),
    };
}

// =============================================================================
// Many Connections
// =============================================================================

/// Threads inserting through their own connections all land in the log.
#[test]
fn test_concurrent_connections_commit_everything() {
    let temp_dir = TempDir::new().unwrap();
    let db = database(&temp_dir);
    let (table, column) = table(&db);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let conn = Connection::new(db);
                for i in 0..10 {
                    let mut tx = conn.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
                    let mut fields = BTreeMap::new();
                    fields.insert(column, Value::Integer(worker * 100 + i));
                    tx.add(Insert {
                        table,
                        extra_tables: Vec::new(),
                        fields,
                    });
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.catalog().unwrap().rows_of(table).count(), 40);
    assert_eq!(db.metrics().commits, 41);

    let reopened = Database::open(db.config().clone(), Logger::memory(Level::Warn)).unwrap();
    assert_eq!(*reopened.catalog().unwrap(), *db.catalog().unwrap());
}
