//! Object-definition physicals

use super::flags::{IndexFlags, TriggerEvents};
use super::value::{DataType, Value};
use super::{relocate_all, relocate_opt};
use crate::position::{FixupTable, Position, PositionResult};

/// Definition text together with the positions of the objects it names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Source {
    pub text: String,
    pub refs: Vec<Position>,
}

impl Source {
    pub fn new(text: impl Into<String>, refs: Vec<Position>) -> Self {
        Self {
            text: text.into(),
            refs,
        }
    }

    pub fn names(&self, pos: Position) -> bool {
        self.refs.contains(&pos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub table: Position,
    pub name: String,
    pub seq: i64,
    pub data_type: DataType,
    pub domain: Option<Position>,
    pub default: Value,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDef {
    pub name: String,
    pub data_type: DataType,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: Position,
    /// Key columns in key order
    pub columns: Vec<Position>,
    pub flags: IndexFlags,
    /// Referenced primary/unique index for a foreign key
    pub references: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureDef {
    pub name: String,
    pub arity: i64,
    /// Set when the procedure is a method of a table type
    pub owner_type: Option<Position>,
    pub body: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDef {
    pub name: String,
    pub table: Position,
    pub events: TriggerEvents,
    pub body: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDef {
    pub name: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDef {
    pub name: String,
    /// Table, column or domain the check constrains
    pub target: Position,
    pub body: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDef {
    pub name: String,
    pub body: Source,
}

/// Physicals that introduce a new schema object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Table(TableDef),
    Column(ColumnDef),
    Domain(DomainDef),
    Index(IndexDef),
    Procedure(ProcedureDef),
    Trigger(TriggerDef),
    Role(RoleDef),
    User(UserDef),
    Check(CheckDef),
    View(ViewDef),
}

impl Definition {
    /// Name the definition binds.
    pub fn name(&self) -> &str {
        match self {
            Definition::Table(d) => &d.name,
            Definition::Column(d) => &d.name,
            Definition::Domain(d) => &d.name,
            Definition::Index(d) => &d.name,
            Definition::Procedure(d) => &d.name,
            Definition::Trigger(d) => &d.name,
            Definition::Role(d) => &d.name,
            Definition::User(d) => &d.name,
            Definition::Check(d) => &d.name,
            Definition::View(d) => &d.name,
        }
    }

    pub(super) fn collect_references(&self, out: &mut Vec<Position>) {
        match self {
            Definition::Table(_) | Definition::Domain(_) => {}
            Definition::Role(_) | Definition::User(_) => {}
            Definition::Column(d) => {
                out.push(d.table);
                out.extend(d.domain);
            }
            Definition::Index(d) => {
                out.push(d.table);
                out.extend(d.columns.iter().copied());
                out.extend(d.references);
            }
            Definition::Procedure(d) => {
                out.extend(d.owner_type);
                out.extend(d.body.refs.iter().copied());
            }
            Definition::Trigger(d) => {
                out.push(d.table);
                out.extend(d.body.refs.iter().copied());
            }
            Definition::Check(d) => {
                out.push(d.target);
                out.extend(d.body.refs.iter().copied());
            }
            Definition::View(d) => out.extend(d.body.refs.iter().copied()),
        }
    }

    pub(super) fn relocate(&mut self, fixup: &FixupTable) -> PositionResult<()> {
        match self {
            Definition::Table(_) | Definition::Domain(_) => {}
            Definition::Role(_) | Definition::User(_) => {}
            Definition::Column(d) => d.relocate(fixup)?,
            Definition::Index(d) => {
                d.table = fixup.relocate(d.table)?;
                relocate_all(&mut d.columns, fixup)?;
                relocate_opt(&mut d.references, fixup)?;
            }
            Definition::Procedure(d) => {
                relocate_opt(&mut d.owner_type, fixup)?;
                relocate_all(&mut d.body.refs, fixup)?;
            }
            Definition::Trigger(d) => {
                d.table = fixup.relocate(d.table)?;
                relocate_all(&mut d.body.refs, fixup)?;
            }
            Definition::Check(d) => {
                d.target = fixup.relocate(d.target)?;
                relocate_all(&mut d.body.refs, fixup)?;
            }
            Definition::View(d) => relocate_all(&mut d.body.refs, fixup)?,
        }
        Ok(())
    }
}

impl ColumnDef {
    pub(super) fn relocate(&mut self, fixup: &FixupTable) -> PositionResult<()> {
        self.table = fixup.relocate(self.table)?;
        relocate_opt(&mut self.domain, fixup)
    }
}
