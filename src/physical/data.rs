//! Data-change physicals

use std::collections::BTreeMap;

use super::value::Value;
use crate::position::{FixupTable, Position, PositionResult};

/// Field map keyed by column position.
pub type Fields = BTreeMap<Position, Value>;

/// New row. The row's identity is the position of this physical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: Position,
    /// Further tables the row belongs to in a merged type hierarchy
    pub extra_tables: Vec<Position>,
    pub fields: Fields,
}

/// New version of an existing row. Absent fields are unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Identity of the row (position of its insert)
    pub row: Position,
    /// Version this update supersedes
    pub prev: Position,
    pub table: Position,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub row: Position,
    pub table: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChange {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl DataChange {
    pub fn table(&self) -> Position {
        match self {
            DataChange::Insert(d) => d.table,
            DataChange::Update(d) => d.table,
            DataChange::Delete(d) => d.table,
        }
    }

    /// True if the change affects rows of `table`.
    pub fn touches_table(&self, table: Position) -> bool {
        match self {
            DataChange::Insert(d) => d.table == table || d.extra_tables.contains(&table),
            _ => self.table() == table,
        }
    }

    /// Fields the change writes.
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            DataChange::Insert(d) => Some(&d.fields),
            DataChange::Update(d) => Some(&d.fields),
            DataChange::Delete(_) => None,
        }
    }

    pub fn writes_column(&self, column: Position) -> bool {
        self.fields().is_some_and(|f| f.contains_key(&column))
    }

    pub(super) fn collect_references(&self, out: &mut Vec<Position>) {
        match self {
            DataChange::Insert(d) => {
                out.push(d.table);
                out.extend(d.extra_tables.iter().copied());
                out.extend(d.fields.keys().copied());
            }
            DataChange::Update(d) => {
                out.push(d.row);
                out.push(d.prev);
                out.push(d.table);
                out.extend(d.fields.keys().copied());
            }
            DataChange::Delete(d) => {
                out.push(d.row);
                out.push(d.table);
            }
        }
    }

    pub(super) fn relocate(&mut self, fixup: &FixupTable) -> PositionResult<()> {
        match self {
            DataChange::Insert(d) => {
                d.table = fixup.relocate(d.table)?;
                super::relocate_all(&mut d.extra_tables, fixup)?;
                d.fields = relocate_fields(&d.fields, fixup)?;
            }
            DataChange::Update(d) => {
                d.row = fixup.relocate(d.row)?;
                d.prev = fixup.relocate(d.prev)?;
                d.table = fixup.relocate(d.table)?;
                d.fields = relocate_fields(&d.fields, fixup)?;
            }
            DataChange::Delete(d) => {
                d.row = fixup.relocate(d.row)?;
                d.table = fixup.relocate(d.table)?;
            }
        }
        Ok(())
    }
}

fn relocate_fields(fields: &Fields, fixup: &FixupTable) -> PositionResult<Fields> {
    fields
        .iter()
        .map(|(col, value)| Ok((fixup.relocate(*col)?, value.clone())))
        .collect()
}
