//! Position identity and fix-up
//!
//! Every object in the database is identified by a 64-bit position:
//! - a durable position is the byte offset of its defining physical in the log
//! - a transaction-local position is a placeholder from a reserved high range
//!
//! During commit each local position is mapped to its final log offset through
//! a [`FixupTable`]. The table is built by the dependency resolver and passed
//! explicitly to every relocation.

mod errors;
mod fixup;

pub use errors::{PositionError, PositionResult};
pub use fixup::FixupTable;

use std::fmt;

/// First transaction-local position. Log offsets are always below this value.
pub const TRANS_POS: u64 = 0x4000_0000_0000_0000;

/// Identity of a physical and of the catalog object it defines.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Position(u64);

impl Position {
    /// Absent optional reference.
    pub const NONE: Position = Position(0);

    /// Built-in role every catalog starts with. Lies inside the log header.
    pub const DEFAULT_ROLE: Position = Position(1);

    /// Built-in user every catalog starts with. Lies inside the log header.
    pub const DEFAULT_USER: Position = Position(2);

    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The `n`th transaction-local position.
    #[inline]
    pub fn local(n: u64) -> Self {
        Self(TRANS_POS + n)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// True for placeholders that have not been written to the log yet.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.0 >= TRANS_POS
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Position `len` bytes further along the log.
    #[inline]
    pub fn advance(&self, len: u64) -> Self {
        Self(self.0 + len)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "'{}", self.0 - TRANS_POS)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_range_is_disjoint_from_log_offsets() {
        assert!(Position::local(0).is_local());
        assert!(!Position::new(TRANS_POS - 1).is_local());
        assert!(!Position::DEFAULT_ROLE.is_local());
    }

    #[test]
    fn test_display_marks_local_positions() {
        assert_eq!(Position::new(42).to_string(), "42");
        assert_eq!(Position::local(3).to_string(), "'3");
    }

    #[test]
    fn test_none_is_zero() {
        assert!(Position::NONE.is_none());
        assert_eq!(Position::default(), Position::NONE);
    }
}
