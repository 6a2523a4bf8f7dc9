//! Bit-set and policy types carried in physical payloads

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Privilege bit-set granted on an object to a role or user.
///
/// Each privilege has a grant-option twin shifted left by 12 bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Privilege(u32);

impl Privilege {
    pub const NONE: Privilege = Privilege(0);
    pub const SELECT: Privilege = Privilege(0x1);
    pub const INSERT: Privilege = Privilege(0x2);
    pub const DELETE: Privilege = Privilege(0x4);
    pub const UPDATE: Privilege = Privilege(0x8);
    pub const REFERENCES: Privilege = Privilege(0x10);
    pub const EXECUTE: Privilege = Privilege(0x20);
    pub const OWNER: Privilege = Privilege(0x40);
    pub const USAGE: Privilege = Privilege(0x100);
    pub const UNDER: Privilege = Privilege(0x200);
    pub const TRIGGER: Privilege = Privilege(0x400);

    const BASE_MASK: u32 = 0xfff;
    const GRANT_SHIFT: u32 = 12;

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Privilege) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The grant-option bits for the privileges in `self`.
    pub fn with_grant_option(&self) -> Privilege {
        Privilege((self.0 & Self::BASE_MASK) << Self::GRANT_SHIFT)
    }

    /// Privileges held by the role that defines an object.
    pub fn owner() -> Privilege {
        let base = Privilege::SELECT
            | Privilege::INSERT
            | Privilege::DELETE
            | Privilege::UPDATE
            | Privilege::REFERENCES
            | Privilege::EXECUTE
            | Privilege::USAGE
            | Privilege::UNDER
            | Privilege::TRIGGER;
        base | base.with_grant_option() | Privilege::OWNER
    }

    /// Removes the bits in `other`.
    pub fn without(&self, other: Privilege) -> Privilege {
        Privilege(self.0 & !other.0)
    }
}

impl BitOr for Privilege {
    type Output = Privilege;

    fn bitor(self, rhs: Self) -> Self::Output {
        Privilege(self.0 | rhs.0)
    }
}

impl BitOrAssign for Privilege {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Index constraint kind and referential actions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct IndexFlags(u32);

impl IndexFlags {
    pub const NONE: IndexFlags = IndexFlags(0);
    pub const PRIMARY_KEY: IndexFlags = IndexFlags(1);
    pub const FOREIGN_KEY: IndexFlags = IndexFlags(2);
    pub const UNIQUE: IndexFlags = IndexFlags(4);
    pub const DESC: IndexFlags = IndexFlags(8);
    pub const UPDATE_RESTRICT: IndexFlags = IndexFlags(16);
    pub const UPDATE_CASCADE: IndexFlags = IndexFlags(32);
    pub const UPDATE_SET_DEFAULT: IndexFlags = IndexFlags(64);
    pub const UPDATE_SET_NULL: IndexFlags = IndexFlags(128);
    pub const DELETE_RESTRICT: IndexFlags = IndexFlags(256);
    pub const DELETE_CASCADE: IndexFlags = IndexFlags(512);
    pub const DELETE_SET_DEFAULT: IndexFlags = IndexFlags(1024);
    pub const DELETE_SET_NULL: IndexFlags = IndexFlags(2048);

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: IndexFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Primary key or unique: at most one row per key.
    pub fn is_unique(&self) -> bool {
        self.contains(IndexFlags::PRIMARY_KEY) || self.contains(IndexFlags::UNIQUE)
    }

    pub fn is_foreign(&self) -> bool {
        self.contains(IndexFlags::FOREIGN_KEY)
    }

    /// Action to take on referencing rows when a referenced row is deleted.
    pub fn on_delete(&self) -> ReferentialAction {
        if self.contains(IndexFlags::DELETE_CASCADE) {
            ReferentialAction::Cascade
        } else if self.contains(IndexFlags::DELETE_SET_NULL) {
            ReferentialAction::SetNull
        } else if self.contains(IndexFlags::DELETE_SET_DEFAULT) {
            ReferentialAction::SetDefault
        } else {
            ReferentialAction::Restrict
        }
    }

    /// Action to take on referencing rows when a referenced key changes.
    pub fn on_update(&self) -> ReferentialAction {
        if self.contains(IndexFlags::UPDATE_CASCADE) {
            ReferentialAction::Cascade
        } else if self.contains(IndexFlags::UPDATE_SET_NULL) {
            ReferentialAction::SetNull
        } else if self.contains(IndexFlags::UPDATE_SET_DEFAULT) {
            ReferentialAction::SetDefault
        } else {
            ReferentialAction::Restrict
        }
    }
}

impl BitOr for IndexFlags {
    type Output = IndexFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        IndexFlags(self.0 | rhs.0)
    }
}

/// What happens to referencing rows when a referenced key goes away.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReferentialAction {
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

/// Policy for objects that depend on a dropped object.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DropAction {
    /// Fail if anything depends on the target
    Restrict = 0,
    /// Rewrite dependent rows to null
    SetNull = 1,
    /// Rewrite dependent rows to the column default
    SetDefault = 2,
    /// Drop dependents too
    Cascade = 3,
}

impl DropAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DropAction::Restrict),
            1 => Some(DropAction::SetNull),
            2 => Some(DropAction::SetDefault),
            3 => Some(DropAction::Cascade),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Trigger firing events.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TriggerEvents(u8);

impl TriggerEvents {
    pub const INSERT: TriggerEvents = TriggerEvents(1);
    pub const UPDATE: TriggerEvents = TriggerEvents(2);
    pub const DELETE: TriggerEvents = TriggerEvents(4);
    pub const BEFORE: TriggerEvents = TriggerEvents(8);
    pub const AFTER: TriggerEvents = TriggerEvents(16);

    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: TriggerEvents) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TriggerEvents {
    type Output = TriggerEvents;

    fn bitor(self, rhs: Self) -> Self::Output {
        TriggerEvents(self.0 | rhs.0)
    }
}
