//! Fix-up table mapping transaction-local positions to final log offsets

use std::collections::BTreeMap;

use super::{Position, PositionError, PositionResult};

/// Local-to-final position map for one commit batch.
///
/// Entries are added in linearized order, so by the time a physical is
/// relocated every position it references has either been durable already or
/// has an entry here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixupTable {
    map: BTreeMap<Position, Position>,
}

impl FixupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `local` will be written at `final_pos`.
    pub fn insert(&mut self, local: Position, final_pos: Position) {
        self.map.insert(local, final_pos);
    }

    /// Final position assigned to `local`, if any.
    pub fn get(&self, local: Position) -> Option<Position> {
        self.map.get(&local).copied()
    }

    pub fn contains(&self, local: Position) -> bool {
        self.map.contains_key(&local)
    }

    /// Translates a position to its final form.
    ///
    /// Durable positions are returned unchanged. A local position without an
    /// entry is a structural error.
    pub fn relocate(&self, pos: Position) -> PositionResult<Position> {
        if !pos.is_local() {
            return Ok(pos);
        }
        self.get(pos).ok_or(PositionError::Unresolved(pos))
    }

    /// True if `pos` is durable or already assigned in this batch.
    pub fn is_committed(&self, pos: Position) -> bool {
        !pos.is_local() || self.contains(pos)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Position, Position)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_positions_pass_through() {
        let table = FixupTable::new();
        assert_eq!(table.relocate(Position::new(100)).unwrap(), Position::new(100));
    }

    #[test]
    fn test_local_positions_are_mapped() {
        let mut table = FixupTable::new();
        table.insert(Position::local(0), Position::new(64));
        assert_eq!(table.relocate(Position::local(0)).unwrap(), Position::new(64));
        assert!(table.is_committed(Position::local(0)));
    }

    #[test]
    fn test_unmapped_local_position_is_structural() {
        let table = FixupTable::new();
        let err = table.relocate(Position::local(7)).unwrap_err();
        assert_eq!(err, PositionError::Unresolved(Position::local(7)));
        assert!(!table.is_committed(Position::local(7)));
    }
}
