//! The closed catalog of log-entry kinds
//!
//! A [`Physical`] is one durable, typed log entry. Its [`Body`] is a tagged
//! union over four groups:
//! - definitions of schema objects
//! - modifications of existing objects (alter, rename, drop, grant, revoke, modify)
//! - data changes (insert, update, delete)
//! - control markers (transaction boundary, triggered action, end of file)
//!
//! Adding a kind means adding a [`PhysicalType`] tag and handling it in the
//! codec and conflict matrix. Every dispatch is an exhaustive match.

mod control;
mod data;
mod definition;
mod flags;
mod modification;
mod value;

pub use control::{Control, EndOfFile, TransactionMarker, TriggeredAction};
pub use data::{DataChange, Delete, Fields, Insert, Update};
pub use definition::{
    CheckDef, ColumnDef, Definition, DomainDef, IndexDef, ProcedureDef, RoleDef, Source,
    TableDef, TriggerDef, UserDef, ViewDef,
};
pub use flags::{DropAction, IndexFlags, Privilege, ReferentialAction, TriggerEvents};
pub use modification::{Alter, Change, DropObject, Edit, Grant, Modification, Modify};
pub use value::{DataType, Value};

use std::fmt;

use crate::position::{FixupTable, Position, PositionError, PositionResult};

/// One-byte tag written at the start of every record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Table = 1,
    Column = 2,
    Domain = 3,
    Index = 4,
    Procedure = 5,
    Trigger = 6,
    Role = 7,
    User = 8,
    Check = 9,
    View = 10,
    Alter = 20,
    Change = 21,
    Drop = 22,
    Grant = 23,
    Revoke = 24,
    Modify = 25,
    Edit = 26,
    Insert = 30,
    Update = 31,
    Delete = 32,
    Transaction = 40,
    TriggeredAction = 41,
    EndOfFile = 42,
}

impl PhysicalType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use PhysicalType::*;
        let kind = match value {
            1 => Table,
            2 => Column,
            3 => Domain,
            4 => Index,
            5 => Procedure,
            6 => Trigger,
            7 => Role,
            8 => User,
            9 => Check,
            10 => View,
            20 => Alter,
            21 => Change,
            22 => Drop,
            23 => Grant,
            24 => Revoke,
            25 => Modify,
            26 => Edit,
            30 => Insert,
            31 => Update,
            32 => Delete,
            40 => Transaction,
            41 => TriggeredAction,
            42 => EndOfFile,
            _ => return None,
        };
        Some(kind)
    }

    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Definition(Definition),
    Modification(Modification),
    Data(DataChange),
    Control(Control),
}

impl Body {
    pub fn kind(&self) -> PhysicalType {
        match self {
            Body::Definition(d) => match d {
                Definition::Table(_) => PhysicalType::Table,
                Definition::Column(_) => PhysicalType::Column,
                Definition::Domain(_) => PhysicalType::Domain,
                Definition::Index(_) => PhysicalType::Index,
                Definition::Procedure(_) => PhysicalType::Procedure,
                Definition::Trigger(_) => PhysicalType::Trigger,
                Definition::Role(_) => PhysicalType::Role,
                Definition::User(_) => PhysicalType::User,
                Definition::Check(_) => PhysicalType::Check,
                Definition::View(_) => PhysicalType::View,
            },
            Body::Modification(m) => match m {
                Modification::Alter(_) => PhysicalType::Alter,
                Modification::Change(_) => PhysicalType::Change,
                Modification::Drop(_) => PhysicalType::Drop,
                Modification::Grant(_) => PhysicalType::Grant,
                Modification::Revoke(_) => PhysicalType::Revoke,
                Modification::Modify(_) => PhysicalType::Modify,
                Modification::Edit(_) => PhysicalType::Edit,
            },
            Body::Data(d) => match d {
                DataChange::Insert(_) => PhysicalType::Insert,
                DataChange::Update(_) => PhysicalType::Update,
                DataChange::Delete(_) => PhysicalType::Delete,
            },
            Body::Control(c) => match c {
                Control::Transaction(_) => PhysicalType::Transaction,
                Control::TriggeredAction(_) => PhysicalType::TriggeredAction,
                Control::EndOfFile(_) => PhysicalType::EndOfFile,
            },
        }
    }
}

macro_rules! body_from {
    ($($ty:ty => $group:ident ( $inner:ident :: $kind:ident )),* $(,)?) => {
        $(
            impl From<$ty> for Body {
                fn from(value: $ty) -> Self {
                    Body::$group($inner::$kind(value))
                }
            }
        )*
    };
}

body_from! {
    TableDef => Definition(Definition::Table),
    ColumnDef => Definition(Definition::Column),
    DomainDef => Definition(Definition::Domain),
    IndexDef => Definition(Definition::Index),
    ProcedureDef => Definition(Definition::Procedure),
    TriggerDef => Definition(Definition::Trigger),
    RoleDef => Definition(Definition::Role),
    UserDef => Definition(Definition::User),
    CheckDef => Definition(Definition::Check),
    ViewDef => Definition(Definition::View),
    Alter => Modification(Modification::Alter),
    Change => Modification(Modification::Change),
    DropObject => Modification(Modification::Drop),
    Modify => Modification(Modification::Modify),
    Edit => Modification(Modification::Edit),
    Insert => Data(DataChange::Insert),
    Update => Data(DataChange::Update),
    Delete => Data(DataChange::Delete),
    TransactionMarker => Control(Control::Transaction),
    TriggeredAction => Control(Control::TriggeredAction),
    EndOfFile => Control(Control::EndOfFile),
}

/// A typed log entry and its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Physical {
    /// Own defining position: the log offset of the tag byte once durable
    pub pos: Position,
    /// Position of the transaction marker that owns this physical
    pub segment: Position,
    pub body: Body,
}

impl Physical {
    pub fn new(pos: Position, body: impl Into<Body>) -> Self {
        Self {
            pos,
            segment: Position::NONE,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> PhysicalType {
        self.body.kind()
    }

    /// Every position this physical's payload refers to, in field order.
    pub fn references(&self) -> Vec<Position> {
        let mut out = Vec::new();
        match &self.body {
            Body::Definition(d) => d.collect_references(&mut out),
            Body::Modification(m) => m.collect_references(&mut out),
            Body::Data(d) => d.collect_references(&mut out),
            Body::Control(c) => c.collect_references(&mut out),
        }
        out.retain(|p| !p.is_none());
        out
    }

    /// True if the payload refers to `pos`.
    pub fn refers_to(&self, pos: Position) -> bool {
        self.references().contains(&pos)
    }

    /// First referenced position that is not yet committed, if any.
    ///
    /// The commit driver must make that position durable before this one.
    pub fn dependent(&self, committed: impl Fn(Position) -> bool) -> Option<Position> {
        self.references().into_iter().find(|p| !committed(*p))
    }

    /// Rewrites own position, segment, and every reference through `fixup`.
    pub fn relocate(&self, fixup: &FixupTable) -> PositionResult<Physical> {
        let mut moved = self.clone();
        moved.pos = fixup.relocate(self.pos)?;
        if !self.segment.is_none() {
            moved.segment = fixup.relocate(self.segment)?;
        }
        match &mut moved.body {
            Body::Definition(d) => d.relocate(fixup)?,
            Body::Modification(m) => m.relocate(fixup)?,
            Body::Data(d) => d.relocate(fixup)?,
            Body::Control(c) => c.relocate(fixup)?,
        }
        Ok(moved)
    }

    /// Fails unless every reference precedes this physical in the log.
    pub fn check_no_forward_reference(&self) -> PositionResult<()> {
        match self.references().into_iter().find(|r| *r >= self.pos) {
            Some(to) => Err(PositionError::ForwardReference { from: self.pos, to }),
            None => Ok(()),
        }
    }

    pub fn as_definition(&self) -> Option<&Definition> {
        match &self.body {
            Body::Definition(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_modification(&self) -> Option<&Modification> {
        match &self.body {
            Body::Modification(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataChange> {
        match &self.body {
            Body::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_marker(&self) -> Option<&TransactionMarker> {
        match &self.body {
            Body::Control(Control::Transaction(m)) => Some(m),
            _ => None,
        }
    }
}

fn relocate_all(positions: &mut [Position], fixup: &FixupTable) -> PositionResult<()> {
    for p in positions.iter_mut() {
        *p = fixup.relocate(*p)?;
    }
    Ok(())
}

fn relocate_opt(position: &mut Option<Position>, fixup: &FixupTable) -> PositionResult<()> {
    if let Some(p) = position {
        *p = fixup.relocate(*p)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn column(table: Position) -> ColumnDef {
        ColumnDef {
            table,
            name: "a".into(),
            seq: 0,
            data_type: DataType::Integer,
            domain: None,
            default: Value::Null,
            not_null: false,
        }
    }

    #[test]
    fn test_tags_round_trip() {
        for tag in 0..=u8::MAX {
            if let Some(kind) = PhysicalType::from_u8(tag) {
                assert_eq!(kind.as_u8(), tag);
            }
        }
        assert_eq!(PhysicalType::from_u8(0), None);
    }

    #[test]
    fn test_references_follow_field_order() {
        let index = IndexDef {
            name: "pk".into(),
            table: Position::new(40),
            columns: vec![Position::new(60), Position::new(80)],
            flags: IndexFlags::PRIMARY_KEY,
            references: None,
        };
        let ph = Physical::new(Position::new(100), index);
        assert_eq!(
            ph.references(),
            vec![Position::new(40), Position::new(60), Position::new(80)]
        );
    }

    #[test]
    fn test_dependent_finds_first_uncommitted() {
        let ph = Physical::new(Position::local(1), column(Position::local(0)));
        let fixup = FixupTable::new();
        assert_eq!(
            ph.dependent(|p| fixup.is_committed(p)),
            Some(Position::local(0))
        );

        let mut fixup = FixupTable::new();
        fixup.insert(Position::local(0), Position::new(32));
        assert_eq!(ph.dependent(|p| fixup.is_committed(p)), None);
    }

    #[test]
    fn test_relocate_rewrites_field_keys() {
        let mut fields = BTreeMap::new();
        fields.insert(Position::local(1), Value::Integer(7));
        let insert = Insert {
            table: Position::local(0),
            extra_tables: vec![],
            fields,
        };
        let ph = Physical::new(Position::local(2), insert);

        let mut fixup = FixupTable::new();
        fixup.insert(Position::local(0), Position::new(50));
        fixup.insert(Position::local(1), Position::new(70));
        fixup.insert(Position::local(2), Position::new(90));

        let moved = ph.relocate(&fixup).unwrap();
        assert_eq!(moved.pos, Position::new(90));
        assert_eq!(
            moved.references(),
            vec![Position::new(50), Position::new(70)]
        );
        assert!(moved.check_no_forward_reference().is_ok());
    }

    #[test]
    fn test_relocate_without_entry_is_structural() {
        let ph = Physical::new(Position::local(1), column(Position::local(0)));
        let mut fixup = FixupTable::new();
        fixup.insert(Position::local(1), Position::new(90));
        assert_eq!(
            ph.relocate(&fixup).unwrap_err(),
            PositionError::Unresolved(Position::local(0))
        );
    }

    #[test]
    fn test_forward_reference_detected() {
        let ph = Physical::new(Position::new(50), column(Position::new(70)));
        assert!(matches!(
            ph.check_no_forward_reference(),
            Err(PositionError::ForwardReference { .. })
        ));
    }

    #[test]
    fn test_grant_and_revoke_share_payload() {
        let grant = Grant {
            privilege: Privilege::SELECT,
            object: Position::new(40),
            grantee: Position::DEFAULT_USER,
        };
        let g = Physical::new(
            Position::new(90),
            Body::Modification(Modification::Grant(grant.clone())),
        );
        let r = Physical::new(
            Position::new(120),
            Body::Modification(Modification::Revoke(grant)),
        );
        assert_eq!(g.kind(), PhysicalType::Grant);
        assert_eq!(r.kind(), PhysicalType::Revoke);
        assert_eq!(g.references(), r.references());
    }
}
