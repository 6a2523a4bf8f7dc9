//! Legacy Log Tests
//!
//! Logs written in format 1 store definition text as a digest with quoted
//! positions instead of an explicit reference list. They must still replay,
//! with references recovered from the digest, and must never be appended to.

use std::fs;
use std::path::Path;

use physlog::codec::{self, LogFormat, PhysicalWriter};
use physlog::config::DatabaseConfig;
use physlog::database::{Database, DatabaseError};
use physlog::log::{LogErrorCode, LogHeader};
use physlog::observability::{Level, Logger};
use physlog::physical::{Physical, PhysicalType, TableDef, TransactionMarker};
use physlog::position::Position;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Writes a format 1 log holding one transaction: table `T` and a view over
/// it whose digest is `digest(table position)`. Returns the table position.
fn write_legacy_log(path: &Path, digest: impl Fn(Position) -> String) -> Position {
    let mut header = LogHeader::new();
    header.format = LogFormat::Legacy;
    let mut bytes = header.encode().to_vec();

    let base = Position::new(bytes.len() as u64);
    let mut marker = Physical::new(
        base,
        TransactionMarker::new(2, Position::DEFAULT_ROLE, Position::DEFAULT_USER),
    );
    marker.segment = base;
    bytes.extend(codec::encode(&marker));

    let mut table = Physical::new(Position::new(bytes.len() as u64), TableDef { name: "T".into() });
    table.segment = base;
    bytes.extend(codec::encode(&table));

    let mut view = PhysicalWriter::new();
    view.put_u8(PhysicalType::View.as_u8());
    view.put_string("V");
    view.put_string(&digest(table.pos));
    view.put_position(base);
    bytes.extend(view.into_bytes());

    fs::write(path, bytes).unwrap();
    table.pos
}

fn open(dir: &TempDir) -> Result<Database, DatabaseError> {
    Database::open(DatabaseConfig::new(dir.path()), Logger::memory(Level::Warn))
}

// =============================================================================
// Replay
// =============================================================================

/// Quoted positions in a digest become the view's references.
#[test]
fn test_legacy_log_replays_with_digest_references() {
    let temp_dir = TempDir::new().unwrap();
    let path = DatabaseConfig::new(temp_dir.path()).log_path();
    let table = write_legacy_log(&path, |t| format!("select * from \"{}\"", t.value()));

    let db = open(&temp_dir).unwrap();
    let catalog = db.catalog().unwrap();
    assert_eq!(catalog.table(table).unwrap().name, "T");

    let physicals = db.physicals().unwrap();
    let view = physicals.last().unwrap();
    assert_eq!(view.references(), vec![table]);
    assert_eq!(catalog.view(view.pos).unwrap().body.refs, vec![table]);
}

/// A digest quoting a position after the view is a forward reference.
#[test]
fn test_legacy_forward_reference_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let path = DatabaseConfig::new(temp_dir.path()).log_path();
    write_legacy_log(&path, |_| "select * from \"100000\"".to_string());

    match open(&temp_dir) {
        Err(DatabaseError::Log(e)) => assert_eq!(e.code(), LogErrorCode::Corruption),
        Err(other) => panic!("expected corruption, got {}", other),
        Ok(_) => panic!("forward reference accepted"),
    }
}

// =============================================================================
// Read Only
// =============================================================================

/// Commits against a legacy log fail and leave the file untouched.
#[test]
fn test_legacy_log_refuses_commits() {
    let temp_dir = TempDir::new().unwrap();
    let path = DatabaseConfig::new(temp_dir.path()).log_path();
    write_legacy_log(&path, |t| format!("select * from \"{}\"", t.value()));
    let length = fs::metadata(&path).unwrap().len();

    let db = open(&temp_dir).unwrap();
    let mut tx = db.begin(Position::DEFAULT_ROLE, Position::DEFAULT_USER).unwrap();
    tx.add(TableDef { name: "New".into() });

    match db.commit(tx) {
        Err(DatabaseError::Log(e)) => assert_eq!(e.code(), LogErrorCode::AppendFailed),
        other => panic!("expected refused append, got {:?}", other.map(|o| o.length)),
    }
    assert!(db.close().is_err());
    assert_eq!(fs::metadata(&path).unwrap().len(), length);
}
