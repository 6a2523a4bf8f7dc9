//! Commit-time validation
//!
//! A committing transaction is checked against every physical committed by
//! another transaction since its snapshot. Two entry points:
//!
//! - [`conflicts`] evaluates the pairwise matrix for one of our physicals and
//!   one of theirs. Each rule is written from the point of view of its first
//!   argument and evaluated in both directions, so the matrix is symmetric for
//!   every unordered pair of kinds.
//! - [`read_check`] tells whether a position the transaction only read was
//!   dropped, renamed or changed by a concurrent commit.
//!
//! Validation never writes. The caller aborts the transaction on the first
//! error returned.

mod errors;
mod rules;

pub use errors::{ConflictCode, ConflictError};

use std::collections::BTreeSet;

use crate::catalog::Catalog;
use crate::physical::{Body, DataChange, Definition, Modification, Physical};
use crate::position::Position;

/// Catalogs the rules consult for row values and index definitions.
#[derive(Debug, Clone, Copy)]
pub struct ConflictContext<'a> {
    /// Catalog as of the committing transaction's snapshot
    pub snapshot: &'a Catalog,
    /// Latest committed catalog
    pub current: &'a Catalog,
}

impl<'a> ConflictContext<'a> {
    pub fn new(snapshot: &'a Catalog, current: &'a Catalog) -> Self {
        Self { snapshot, current }
    }
}

/// Checks one of our physicals against one committed concurrently.
///
/// The returned error names our position, theirs, and the marker of their
/// transaction (`theirs.segment`).
pub fn conflicts(ours: &Physical, theirs: &Physical, ctx: &ConflictContext<'_>) -> Option<ConflictError> {
    rules::rule(ours, theirs, ctx)
        .or_else(|| rules::rule(theirs, ours, ctx))
        .map(|(code, object)| ConflictError::new(code, ours.pos, theirs.pos, theirs.segment).on(object))
}

/// Checks a position the transaction read against one committed physical.
///
/// A table position stands for a read of the whole table, so any row or
/// shape change of the table invalidates it. A read is also invalidated
/// through its owner: dropping a table drops the rows and columns read from
/// it, and a cascading delete removes rows that were never named.
pub fn read_check(
    pos: Position,
    theirs: &Physical,
    marker: Position,
    ctx: &ConflictContext<'_>,
) -> Option<ConflictError> {
    let code = named_read(pos, theirs).or_else(|| owned_read(pos, theirs, ctx))?;
    Some(ConflictError::new(code, pos, theirs.pos, marker).on(Some(pos)))
}

/// Reads invalidated by a physical that names the read position.
fn named_read(pos: Position, theirs: &Physical) -> Option<ConflictCode> {
    let code = match &theirs.body {
        Body::Modification(Modification::Drop(d)) if d.target == pos => ConflictCode::ReadDropped,
        Body::Modification(Modification::Change(c)) if c.target == pos => ConflictCode::ReadRenamed,
        Body::Modification(Modification::Alter(a)) if a.target == pos => ConflictCode::ReadChanged,
        Body::Modification(Modification::Modify(m)) if m.target == pos => ConflictCode::ReadChanged,
        Body::Modification(Modification::Edit(e)) if e.target == pos => ConflictCode::ReadChanged,
        Body::Data(DataChange::Update(u)) if u.row == pos => ConflictCode::ReadChanged,
        Body::Data(DataChange::Delete(d)) if d.row == pos => ConflictCode::ReadChanged,
        Body::Data(d) if d.touches_table(pos) => ConflictCode::ReadTableChanged,
        Body::Definition(Definition::Column(c)) if c.table == pos => ConflictCode::ReadTableChanged,
        Body::Definition(Definition::Index(x)) if x.table == pos => ConflictCode::ReadTableChanged,
        _ => return None,
    };
    Some(code)
}

/// Reads invalidated through the object that owned the read position.
fn owned_read(pos: Position, theirs: &Physical, ctx: &ConflictContext<'_>) -> Option<ConflictCode> {
    let snapshot = ctx.snapshot;
    let removed = snapshot.contains(pos) && !ctx.current.contains(pos);
    match &theirs.body {
        Body::Modification(Modification::Drop(d)) => {
            if removed
                && (snapshot.owners(pos).contains(&d.target) || snapshot.dependents(d.target).contains(&pos))
            {
                return Some(ConflictCode::ReadDropped);
            }
            if snapshot.owners(d.target).contains(&pos) {
                return Some(ConflictCode::ReadTableChanged);
            }
            let column_table = snapshot.column(d.target).map(|c| c.table)?;
            snapshot
                .row(pos)
                .is_some_and(|r| r.tables.contains(&column_table))
                .then_some(ConflictCode::ReadChanged)
        }
        Body::Modification(Modification::Edit(e)) => snapshot
            .column(pos)
            .is_some_and(|c| c.domain == Some(e.target))
            .then_some(ConflictCode::ReadChanged),
        Body::Data(DataChange::Delete(d)) if removed => {
            let row = snapshot.row(pos)?;
            references_table(snapshot, &row.tables, d.table).then_some(ConflictCode::ReadDropped)
        }
        _ => None,
    }
}

/// True if any of `from` reaches `target` through foreign keys.
fn references_table(catalog: &Catalog, from: &[Position], target: Position) -> bool {
    let mut seen: BTreeSet<Position> = from.iter().copied().collect();
    let mut queue: Vec<Position> = from.to_vec();
    while let Some(table) = queue.pop() {
        for index in catalog.indexes_of(table).filter(|i| i.flags.is_foreign()) {
            let Some(referenced) = index.references.and_then(|r| catalog.index(r)) else {
                continue;
            };
            if referenced.table == target {
                return true;
            }
            if seen.insert(referenced.table) {
                queue.push(referenced.table);
            }
        }
    }
    false
}
