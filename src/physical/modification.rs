//! Object-modification physicals
//!
//! A modification never edits the physical that defined its target. It is a
//! new physical that names the target by position.

use super::definition::{ColumnDef, DomainDef, Source};
use super::flags::{DropAction, Privilege};
use crate::position::{FixupTable, Position, PositionResult};

/// Redefinition of a column's type, default or nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alter {
    /// Column being superseded
    pub target: Position,
    pub column: ColumnDef,
}

/// Rename of any named object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub target: Position,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropObject {
    pub target: Position,
    pub action: DropAction,
}

/// Payload shared by grant and revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub privilege: Privilege,
    pub object: Position,
    /// Role or user receiving (or losing) the privilege
    pub grantee: Position,
}

/// Replacement body for a procedure, method or view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modify {
    pub target: Position,
    pub name: String,
    pub body: Source,
}

/// Redefinition of a domain. Columns declared over it take the new type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub target: Position,
    pub domain: DomainDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Alter(Alter),
    Change(Change),
    Drop(DropObject),
    Grant(Grant),
    Revoke(Grant),
    Modify(Modify),
    Edit(Edit),
}

impl Modification {
    /// Position of the object this modification acts on.
    pub fn target(&self) -> Position {
        match self {
            Modification::Alter(m) => m.target,
            Modification::Change(m) => m.target,
            Modification::Drop(m) => m.target,
            Modification::Grant(m) | Modification::Revoke(m) => m.object,
            Modification::Modify(m) => m.target,
            Modification::Edit(m) => m.target,
        }
    }

    pub(super) fn collect_references(&self, out: &mut Vec<Position>) {
        match self {
            Modification::Alter(m) => {
                out.push(m.target);
                out.push(m.column.table);
                out.extend(m.column.domain);
            }
            Modification::Change(m) => out.push(m.target),
            Modification::Drop(m) => out.push(m.target),
            Modification::Grant(m) | Modification::Revoke(m) => {
                out.push(m.object);
                out.push(m.grantee);
            }
            Modification::Modify(m) => {
                out.push(m.target);
                out.extend(m.body.refs.iter().copied());
            }
            Modification::Edit(m) => out.push(m.target),
        }
    }

    pub(super) fn relocate(&mut self, fixup: &FixupTable) -> PositionResult<()> {
        match self {
            Modification::Alter(m) => {
                m.target = fixup.relocate(m.target)?;
                m.column.relocate(fixup)?;
            }
            Modification::Change(m) => m.target = fixup.relocate(m.target)?,
            Modification::Drop(m) => m.target = fixup.relocate(m.target)?,
            Modification::Grant(m) | Modification::Revoke(m) => {
                m.object = fixup.relocate(m.object)?;
                m.grantee = fixup.relocate(m.grantee)?;
            }
            Modification::Modify(m) => {
                m.target = fixup.relocate(m.target)?;
                super::relocate_all(&mut m.body.refs, fixup)?;
            }
            Modification::Edit(m) => m.target = fixup.relocate(m.target)?,
        }
        Ok(())
    }
}
