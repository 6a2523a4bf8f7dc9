//! Transaction write-sets and their resolution into commit batches
//!
//! A [`Transaction`] collects physicals under transaction-local positions and
//! records what it read. Nothing it holds is visible to anyone else until the
//! database commits it: see `Database::commit`.

pub mod resolver;

pub use resolver::{linearize, Batch};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::physical::{Body, Physical};
use crate::position::{FixupTable, Position};

/// An open transaction: snapshot, pending write-set and read set.
#[derive(Debug, Clone)]
pub struct Transaction {
    role: Position,
    user: Position,
    /// Log length when the transaction began
    snapshot: Position,
    catalog: Arc<Catalog>,
    pending: Vec<Physical>,
    reads: BTreeSet<Position>,
    next_local: u64,
}

impl Transaction {
    pub(crate) fn new(role: Position, user: Position, snapshot: Position, catalog: Arc<Catalog>) -> Self {
        Self {
            role,
            user,
            snapshot,
            catalog,
            pending: Vec::new(),
            reads: BTreeSet::new(),
            next_local: 0,
        }
    }

    /// Adds a physical to the write-set and returns its local position.
    ///
    /// Later physicals of the same transaction may refer to the returned
    /// position; it is rewritten to a log offset at commit.
    pub fn add(&mut self, body: impl Into<Body>) -> Position {
        let pos = Position::local(self.next_local);
        self.next_local += 1;
        self.pending.push(Physical::new(pos, body));
        pos
    }

    /// Records that the transaction's decisions depend on `pos`.
    ///
    /// A table position stands for the whole table.
    pub fn record_read(&mut self, pos: Position) {
        if !pos.is_local() && !pos.is_none() {
            self.reads.insert(pos);
        }
    }

    pub fn role(&self) -> Position {
        self.role
    }

    pub fn user(&self) -> Position {
        self.user
    }

    pub fn snapshot(&self) -> Position {
        self.snapshot
    }

    /// Catalog as of the snapshot
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn pending(&self) -> &[Physical] {
        &self.pending
    }

    pub fn reads(&self) -> &BTreeSet<Position> {
        &self.reads
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Position of the transaction marker; `None` for an empty write-set
    pub marker: Option<Position>,
    /// Log length after the commit
    pub length: u64,
    /// Final position of every local position the transaction handed out
    pub fixup: FixupTable,
    /// Catalog including the transaction's effects
    pub catalog: Arc<Catalog>,
}

impl CommitOutcome {
    /// Final position of a local position returned by [`Transaction::add`].
    pub fn resolve(&self, local: Position) -> Option<Position> {
        self.fixup.get(local)
    }
}
