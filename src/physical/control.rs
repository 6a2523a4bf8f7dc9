//! Control physicals: transaction boundaries, trigger context, end of file

use chrono::{DateTime, Utc};

use crate::position::{FixupTable, Position, PositionResult};

/// Starts a committed transaction. The next `nrecs` physicals belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMarker {
    pub nrecs: i64,
    pub role: Position,
    pub user: Position,
    /// Commit time in microseconds since the Unix epoch
    pub timestamp: i64,
}

impl TransactionMarker {
    pub fn new(nrecs: i64, role: Position, user: Position) -> Self {
        Self {
            nrecs,
            role,
            user,
            timestamp: Utc::now().timestamp_micros(),
        }
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp)
    }
}

/// Subsequent physicals of the transaction run with the trigger definer's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredAction {
    pub trigger: Position,
}

/// Integrity marker: crc32 over every log byte before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfFile {
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Transaction(TransactionMarker),
    TriggeredAction(TriggeredAction),
    EndOfFile(EndOfFile),
}

impl Control {
    pub(super) fn collect_references(&self, out: &mut Vec<Position>) {
        match self {
            Control::Transaction(m) => {
                out.push(m.role);
                out.push(m.user);
            }
            Control::TriggeredAction(t) => out.push(t.trigger),
            Control::EndOfFile(_) => {}
        }
    }

    pub(super) fn relocate(&mut self, fixup: &FixupTable) -> PositionResult<()> {
        match self {
            Control::Transaction(m) => {
                m.role = fixup.relocate(m.role)?;
                m.user = fixup.relocate(m.user)?;
            }
            Control::TriggeredAction(t) => t.trigger = fixup.relocate(t.trigger)?,
            Control::EndOfFile(_) => {}
        }
        Ok(())
    }
}
