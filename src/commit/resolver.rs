//! Dependency resolver
//!
//! Turns a transaction's pending physicals into a commit batch without any
//! I/O. Each physical is placed after every pending physical it references,
//! final positions are assigned by encoded length starting at the log end,
//! and the whole batch is relocated and encoded in one pass.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{encode, encoded_len};
use crate::physical::{Physical, TransactionMarker};
use crate::position::{FixupTable, Position, PositionError, PositionResult};

/// A fully resolved commit batch, ready to append at `marker`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Final position of the transaction marker, equal to the log length
    pub marker: Position,
    /// Marker first, then the transaction's physicals in dependency order
    pub physicals: Vec<Physical>,
    pub bytes: Vec<u8>,
    pub fixup: FixupTable,
    /// Log length once the batch is appended
    pub end: Position,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.physicals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.physicals.is_empty()
    }
}

struct Placement<'a> {
    pending: &'a [Physical],
    index: BTreeMap<Position, usize>,
    placed: BTreeSet<Position>,
    visiting: BTreeSet<Position>,
    order: Vec<usize>,
}

impl Placement<'_> {
    fn place(&mut self, pos: Position) -> PositionResult<()> {
        if self.placed.contains(&pos) {
            return Ok(());
        }
        let i = *self.index.get(&pos).ok_or(PositionError::Unresolved(pos))?;
        if !self.visiting.insert(pos) {
            return Err(PositionError::Cycle(pos));
        }

        let pending = self.pending;
        let ph = &pending[i];
        loop {
            let placed = &self.placed;
            let Some(dep) = ph.dependent(|p| !p.is_local() || placed.contains(&p)) else {
                break;
            };
            self.place(dep)?;
        }

        self.visiting.remove(&pos);
        self.placed.insert(pos);
        self.order.push(i);
        Ok(())
    }
}

/// Orders, positions, relocates and encodes a write-set.
///
/// `base` is the current log length. `marker` supplies the identity and
/// timestamp; its record count is set here.
///
/// # Errors
///
/// All errors are structural: a reference to a local position outside the
/// write-set, a dependency cycle, or a durable reference at or beyond `base`.
pub fn linearize(pending: &[Physical], base: Position, marker: TransactionMarker) -> PositionResult<Batch> {
    for ph in pending {
        if let Some(r) = ph.references().into_iter().find(|r| !r.is_local() && *r >= base) {
            return Err(PositionError::BeyondLogEnd { reference: r, end: base });
        }
    }

    let mut placement = Placement {
        pending,
        index: pending.iter().enumerate().map(|(i, ph)| (ph.pos, i)).collect(),
        placed: BTreeSet::new(),
        visiting: BTreeSet::new(),
        order: Vec::with_capacity(pending.len()),
    };
    for ph in pending {
        placement.place(ph.pos)?;
    }

    let mut head = Physical::new(
        base,
        TransactionMarker {
            nrecs: placement.order.len() as i64,
            ..marker
        },
    );
    head.segment = base;

    let mut fixup = FixupTable::new();
    let mut next = base.advance(encoded_len(&head));
    for &i in &placement.order {
        let ph = &pending[i];
        fixup.insert(ph.pos, next);
        next = next.advance(encoded_len(ph));
    }

    let mut bytes = encode(&head);
    let mut physicals = Vec::with_capacity(placement.order.len() + 1);
    physicals.push(head);
    for &i in &placement.order {
        let mut moved = pending[i].relocate(&fixup)?;
        moved.segment = base;
        moved.check_no_forward_reference()?;
        bytes.extend(encode(&moved));
        physicals.push(moved);
    }

    Ok(Batch {
        marker: base,
        physicals,
        bytes,
        fixup,
        end: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::{ColumnDef, DataType, IndexDef, IndexFlags, TableDef, Value};

    fn marker() -> TransactionMarker {
        TransactionMarker::new(0, Position::DEFAULT_ROLE, Position::DEFAULT_USER)
    }

    fn column(pos: Position, table: Position) -> Physical {
        Physical::new(
            pos,
            ColumnDef {
                table,
                name: "a".into(),
                seq: 0,
                data_type: DataType::Integer,
                domain: None,
                default: Value::Null,
                not_null: false,
            },
        )
    }

    #[test]
    fn test_prerequisites_are_placed_first() {
        let index = Physical::new(
            Position::local(2),
            IndexDef {
                name: "pk".into(),
                table: Position::local(0),
                columns: vec![Position::local(1)],
                flags: IndexFlags::PRIMARY_KEY,
                references: None,
            },
        );
        let pending = vec![
            index,
            column(Position::local(1), Position::local(0)),
            Physical::new(Position::local(0), TableDef { name: "T".into() }),
        ];

        let batch = linearize(&pending, Position::new(32), marker()).unwrap();
        assert_eq!(batch.marker, Position::new(32));
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.physicals[0].as_marker().unwrap().nrecs, 3);

        let table = batch.fixup.get(Position::local(0)).unwrap();
        let col = batch.fixup.get(Position::local(1)).unwrap();
        let idx = batch.fixup.get(Position::local(2)).unwrap();
        assert!(Position::new(32) < table && table < col && col < idx);
        for ph in &batch.physicals {
            assert_eq!(ph.segment, batch.marker);
            assert!(ph.check_no_forward_reference().is_ok());
        }
        assert_eq!(batch.end.value(), 32 + batch.bytes.len() as u64);
    }

    #[test]
    fn test_positions_match_encoded_offsets() {
        let pending = vec![
            Physical::new(Position::local(0), TableDef { name: "T".into() }),
            column(Position::local(1), Position::local(0)),
        ];
        let batch = linearize(&pending, Position::new(100), marker()).unwrap();
        let mut offset = 100;
        for ph in &batch.physicals {
            assert_eq!(ph.pos.value(), offset);
            offset += encode(ph).len() as u64;
        }
    }

    #[test]
    fn test_unknown_local_reference_is_unresolved() {
        let pending = vec![column(Position::local(1), Position::local(9))];
        assert_eq!(
            linearize(&pending, Position::new(32), marker()).unwrap_err(),
            PositionError::Unresolved(Position::local(9))
        );
    }

    #[test]
    fn test_reference_beyond_log_end_rejected() {
        let pending = vec![column(Position::local(0), Position::new(500))];
        assert!(matches!(
            linearize(&pending, Position::new(100), marker()),
            Err(PositionError::BeyondLogEnd { .. })
        ));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let pending = vec![column(Position::local(0), Position::local(0))];
        assert_eq!(
            linearize(&pending, Position::new(32), marker()).unwrap_err(),
            PositionError::Cycle(Position::local(0))
        );
    }
}
