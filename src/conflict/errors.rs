//! Conflict error types
//!
//! Every conflict names the rule that fired, both physicals of the pair and
//! the marker of the transaction that committed first. Conflicts always abort
//! the committing transaction; they are never merged or retried here.

use std::fmt;

use crate::errors::Severity;
use crate::position::Position;

/// Rule that detected a conflict, numbered by its SQLSTATE-style code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictCode {
    // ==================
    // Write/write
    // ==================
    /// Drop vs something that still references the dropped object
    DroppedReference,
    /// Drop of a table vs a data change on it
    DroppedTable,
    /// Drop of a column vs a data change writing it
    DroppedColumn,
    /// Delete vs delete of the same row
    RowDeletedTwice,
    /// Two new columns with one name on one table
    DuplicateColumn,
    /// Two inserts or updates producing one unique key
    DuplicateKey,
    /// Insert referencing a row deleted concurrently
    InsertReferencesDeleted,
    /// Update vs update or delete of the same row
    RowChanged,
    /// Two definitions or a rename producing one name in one scope
    DuplicateName,
    /// Concurrent index, trigger or check definitions on one table
    TableDefinitionChanged,
    /// New column vs alter or update on the same table
    ColumnAdded,
    /// Grant or revoke vs grant, revoke, alter, rename or modify of the object
    PrivilegeChanged,
    /// Alter, rename or modify of one target by both transactions
    ObjectModified,
    /// Update setting a foreign key to a row deleted concurrently
    UpdateReferencesDeleted,
    /// Alter of a column vs an index or check using it
    AlteredIndexedColumn,
    /// Alter of a column vs an insert writing it
    AlteredInsertedColumn,
    /// Alter of a column vs an update writing it
    AlteredUpdatedColumn,
    /// Update of a referenced key vs an insert or update using the old key
    ReferencedKeyChanged,

    // ==================
    // Read checks
    // ==================
    /// Object read by the transaction was dropped
    ReadDropped,
    /// Object read by the transaction was renamed
    ReadRenamed,
    /// Column or row read by the transaction was changed
    ReadChanged,
    /// Table read in full gained or lost rows or columns
    ReadTableChanged,
}

impl ConflictCode {
    /// SQLSTATE-style code
    pub fn code(&self) -> &'static str {
        match self {
            ConflictCode::DroppedReference => "40010",
            ConflictCode::DroppedTable => "40012",
            ConflictCode::DroppedColumn => "40013",
            ConflictCode::RowDeletedTwice => "40014",
            ConflictCode::DuplicateColumn => "40025",
            ConflictCode::DuplicateKey => "40026",
            ConflictCode::InsertReferencesDeleted => "40027",
            ConflictCode::RowChanged => "40029",
            ConflictCode::DuplicateName => "40030",
            ConflictCode::TableDefinitionChanged => "40042",
            ConflictCode::ColumnAdded => "40045",
            ConflictCode::PrivilegeChanged => "40051",
            ConflictCode::ObjectModified => "40052",
            ConflictCode::UpdateReferencesDeleted => "40074",
            ConflictCode::AlteredIndexedColumn => "40077",
            ConflictCode::AlteredInsertedColumn => "40079",
            ConflictCode::AlteredUpdatedColumn => "40080",
            ConflictCode::ReferencedKeyChanged => "40086",
            ConflictCode::ReadDropped => "40073",
            ConflictCode::ReadRenamed => "40005",
            ConflictCode::ReadChanged => "40006",
            ConflictCode::ReadTableChanged => "40008",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConflictCode::DroppedReference => "object dropped while still referenced",
            ConflictCode::DroppedTable => "table dropped by a concurrent transaction",
            ConflictCode::DroppedColumn => "column dropped by a concurrent transaction",
            ConflictCode::RowDeletedTwice => "row deleted by a concurrent transaction",
            ConflictCode::DuplicateColumn => "column name defined concurrently",
            ConflictCode::DuplicateKey => "duplicate key produced concurrently",
            ConflictCode::InsertReferencesDeleted => "referenced row deleted concurrently",
            ConflictCode::RowChanged => "row changed by a concurrent transaction",
            ConflictCode::DuplicateName => "name defined concurrently",
            ConflictCode::TableDefinitionChanged => "table definition changed concurrently",
            ConflictCode::ColumnAdded => "column added concurrently",
            ConflictCode::PrivilegeChanged => "privileges changed concurrently",
            ConflictCode::ObjectModified => "object modified concurrently",
            ConflictCode::UpdateReferencesDeleted => "referenced row deleted concurrently",
            ConflictCode::AlteredIndexedColumn => "indexed column altered concurrently",
            ConflictCode::AlteredInsertedColumn => "inserted column altered concurrently",
            ConflictCode::AlteredUpdatedColumn => "updated column altered concurrently",
            ConflictCode::ReferencedKeyChanged => "referenced key changed concurrently",
            ConflictCode::ReadDropped => "object read by this transaction was dropped",
            ConflictCode::ReadRenamed => "object read by this transaction was renamed",
            ConflictCode::ReadChanged => "data read by this transaction was changed",
            ConflictCode::ReadTableChanged => "table read by this transaction was changed",
        }
    }

    /// True for the codes raised by read checks rather than the pairwise matrix
    pub fn is_read_conflict(&self) -> bool {
        matches!(
            self,
            ConflictCode::ReadDropped
                | ConflictCode::ReadRenamed
                | ConflictCode::ReadChanged
                | ConflictCode::ReadTableChanged
        )
    }
}

impl fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A fired conflict rule with the positions that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictError {
    code: ConflictCode,
    /// Physical (or read position) of the committing transaction
    ours: Position,
    /// Physical committed concurrently
    theirs: Position,
    /// Marker of the transaction that committed `theirs`
    marker: Position,
    /// Object the pair collided on, such as an index or row
    object: Option<Position>,
}

impl ConflictError {
    pub fn new(code: ConflictCode, ours: Position, theirs: Position, marker: Position) -> Self {
        Self {
            code,
            ours,
            theirs,
            marker,
            object: None,
        }
    }

    pub fn on(mut self, object: Option<Position>) -> Self {
        self.object = object;
        self
    }

    pub fn code(&self) -> ConflictCode {
        self.code
    }

    pub fn ours(&self) -> Position {
        self.ours
    }

    pub fn theirs(&self) -> Position {
        self.theirs
    }

    pub fn marker(&self) -> Position {
        self.marker
    }

    pub fn object(&self) -> Option<Position> {
        self.object
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (ours: {}, theirs: {}, marker: {}",
            self.severity(),
            self.code.code(),
            self.code.description(),
            self.ours,
            self.theirs,
            self.marker
        )?;
        if let Some(object) = self.object {
            write!(f, ", object: {}", object)?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for ConflictError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_all_positions() {
        let err = ConflictError::new(
            ConflictCode::DuplicateKey,
            Position::local(3),
            Position::new(280),
            Position::new(250),
        )
        .on(Some(Position::new(90)));
        let text = err.to_string();
        assert!(text.starts_with("[ERROR] 40026"));
        assert!(text.contains("theirs: 280"));
        assert!(text.contains("marker: 250"));
        assert!(text.contains("object: 90"));
    }

    #[test]
    fn test_read_codes_are_classified() {
        assert!(ConflictCode::ReadDropped.is_read_conflict());
        assert!(!ConflictCode::RowChanged.is_read_conflict());
        assert_eq!(ConflictCode::ReadTableChanged.code(), "40008");
    }
}
