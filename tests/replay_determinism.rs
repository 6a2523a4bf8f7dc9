//! Replay Determinism Tests
//!
//! The catalog is a pure function of the log:
//! - folding `install` over the durable physicals from an empty catalog
//!   reproduces the catalog built commit by commit
//! - reopening the log any number of times yields the same catalog
//! - the reader returns exactly the physicals the database appended

use std::collections::BTreeMap;

use physlog::catalog::{install, Catalog, InstallContext};
use physlog::config::DatabaseConfig;
use physlog::database::Database;
use physlog::log::LogReader;
use physlog::observability::{Level, Logger};
use physlog::physical::{
    Change, ColumnDef, DataType, Delete, IndexDef, IndexFlags, Insert, Source, TableDef, Update,
    Value, ViewDef,
};
use physlog::position::Position;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open(dir: &TempDir) -> Database {
    Database::open(DatabaseConfig::new(dir.path()), Logger::memory(Level::Warn)).unwrap()
}

/// Schema changes, inserts, updates, deletes and a rename, each its own commit
fn workload(db: &Database) {
    let begin = || db.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();

    let mut tx = begin();
    let table = tx.add(TableDef { name: "Items".into() });
    let id = tx.add(ColumnDef {
        table,
        name: "id".into(),
        seq: 0,
        data_type: DataType::Integer,
        domain: None,
        default: Value::Null,
        not_null: true,
    });
    let label = tx.add(ColumnDef {
        table,
        name: "label".into(),
        seq: 1,
        data_type: DataType::Text,
        domain: None,
        default: Value::Text("none".into()),
        not_null: false,
    });
    tx.add(IndexDef {
        name: "Items_pk".into(),
        table,
        columns: vec![id],
        flags: IndexFlags::PRIMARY_KEY,
        references: None,
    });
    let outcome = db.commit(tx).unwrap();
    let table = outcome.resolve(table).unwrap();
    let id = outcome.resolve(id).unwrap();
    let label = outcome.resolve(label).unwrap();

    let mut rows = Vec::new();
    for n in 0..10 {
        let mut tx = begin();
        let mut fields = BTreeMap::new();
        fields.insert(id, Value::Integer(n));
        if n % 2 == 0 {
            fields.insert(label, Value::Text(format!("item {}", n)));
        }
        let row = tx.add(Insert {
            table,
            extra_tables: Vec::new(),
            fields,
        });
        rows.push(db.commit(tx).unwrap().resolve(row).unwrap());
    }

    for (n, row) in rows.iter().enumerate().filter(|(n, _)| n % 3 == 0) {
        let mut tx = begin();
        let mut fields = BTreeMap::new();
        fields.insert(label, Value::Text(format!("updated {}", n)));
        tx.add(Update {
            row: *row,
            prev: *row,
            table,
            fields,
        });
        db.commit(tx).unwrap();
    }

    let mut tx = begin();
    tx.add(Delete { row: rows[4], table });
    tx.add(Delete { row: rows[5], table });
    db.commit(tx).unwrap();

    let mut tx = begin();
    tx.add(ViewDef {
        name: "Labels".into(),
        body: Source::new(format!("select {} from {}", label, table), vec![label, table]),
    });
    tx.add(Change {
        target: table,
        name: "Things".into(),
    });
    db.commit(tx).unwrap();
}

// =============================================================================
// Fold Equals Incremental
// =============================================================================

/// Folding the free `install` over the log reproduces the live catalog.
#[test]
fn test_fold_reproduces_live_catalog() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(&temp_dir);
    workload(&db);

    let mut ctx = InstallContext::default();
    let folded = db
        .physicals()
        .unwrap()
        .iter()
        .try_fold(Catalog::new(), |catalog, ph| {
            install(ph, &mut ctx, &catalog).map(|(next, _)| next)
        })
        .unwrap();

    assert_eq!(folded, *db.catalog().unwrap());
    assert_eq!(folded.row_count(), 8);
}

// =============================================================================
// Reopen
// =============================================================================

/// Reopening the log rebuilds an identical catalog every time.
#[test]
fn test_reopen_is_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let live = {
        let db = open(&temp_dir);
        workload(&db);
        db.catalog().unwrap()
    };

    for _ in 0..3 {
        let db = open(&temp_dir);
        assert_eq!(*db.catalog().unwrap(), *live);
    }
}

/// The reader returns the physicals the database holds, positions included.
#[test]
fn test_reader_matches_appended_physicals() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(&temp_dir);
    workload(&db);

    let mut reader = LogReader::open(&db.config().log_path()).unwrap();
    let read = reader.read_all().unwrap();
    assert_eq!(read, db.physicals().unwrap());
    assert_eq!(reader.offset(), db.length().unwrap());
}

/// Replay after close sees the end-of-file marker and appends continue after it.
#[test]
fn test_replay_across_close() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let db = open(&temp_dir);
        workload(&db);
        db.close().unwrap();
        db.catalog().unwrap()
    };

    let db = open(&temp_dir);
    assert_eq!(*db.catalog().unwrap(), *before);

    let mut tx = db.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
    tx.add(TableDef { name: "Later".into() });
    db.commit(tx).unwrap();

    let reopened = open(&temp_dir);
    assert_eq!(*reopened.catalog().unwrap(), *db.catalog().unwrap());
}
