//! In-memory catalog
//!
//! The catalog is the projection built by folding [`Catalog::install`] over the
//! log in position order. It holds every live schema object, every row, and
//! the key maps of every index.
//!
//! # API
//!
//! - `install(physical, ctx)` - Apply one physical
//! - `lookup(role, name)` - Resolve a name in a role's name table
//! - `row(pos)` / `value_of(row, column)` - Row access with column defaults
//! - `kind_of(pos)` - What kind of object lives at a position
//!
//! All maps are ordered so that replaying a log always rebuilds an identical
//! catalog.

mod drop;
mod errors;
mod install;

pub use errors::{InstallError, InstallResult};
pub use install::{install, InstallContext};

use std::collections::{BTreeMap, BTreeSet};

use crate::physical::{DataType, Fields, IndexFlags, Privilege, Source, TriggerEvents, Value};
use crate::position::Position;

/// Ordered key of an index entry.
pub type Key = Vec<Value>;

/// Renders a key for error messages.
pub fn format_key(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub pos: Position,
    pub name: String,
    /// Columns ordered by sequence number
    pub columns: Vec<Position>,
    pub indexes: Vec<Position>,
    pub triggers: Vec<Position>,
    pub checks: Vec<Position>,
    pub rows: BTreeSet<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub pos: Position,
    pub table: Position,
    pub name: String,
    pub seq: i64,
    pub data_type: DataType,
    pub domain: Option<Position>,
    pub default: Value,
    pub not_null: bool,
    /// Last physical that defined or altered the column
    pub version: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub pos: Position,
    pub name: String,
    pub data_type: DataType,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub pos: Position,
    pub name: String,
    pub table: Position,
    pub columns: Vec<Position>,
    pub flags: IndexFlags,
    pub references: Option<Position>,
    /// Foreign-key indexes that reference this one
    pub referenced_by: Vec<Position>,
    pub keys: BTreeMap<Key, BTreeSet<Position>>,
}

impl Index {
    pub fn rows_with(&self, key: &Key) -> impl Iterator<Item = Position> + '_ {
        self.keys.get(key).into_iter().flat_map(|rows| rows.iter().copied())
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.keys.get(key).is_some_and(|rows| !rows.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub pos: Position,
    pub name: String,
    pub arity: i64,
    pub owner_type: Option<Position>,
    pub body: Source,
    pub definer: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub pos: Position,
    pub name: String,
    pub table: Position,
    pub events: TriggerEvents,
    pub body: Source,
    /// Role whose identity triggered actions run under
    pub definer: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub pos: Position,
    pub name: String,
    pub target: Position,
    pub body: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub pos: Position,
    pub name: String,
    pub body: Source,
    pub definer: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub pos: Position,
    pub name: String,
    pub details: String,
    /// Name bindings for objects defined under this role
    pub names: BTreeMap<String, Position>,
    pub privileges: BTreeMap<Position, Privilege>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub pos: Position,
    pub name: String,
    pub privileges: BTreeMap<Position, Privilege>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Position of the insert that created the row
    pub pos: Position,
    /// Owning table first, then any merged tables
    pub tables: Vec<Position>,
    pub fields: Fields,
    /// Position of the latest insert or update of the row
    pub version: Position,
}

impl Row {
    /// Version token a client can hand back for optimistic retry.
    pub fn token(&self) -> (Position, Position) {
        (self.pos, self.version)
    }
}

/// What kind of object lives at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Column,
    Domain,
    Index,
    Procedure,
    Trigger,
    Role,
    User,
    Check,
    View,
    Row,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::Domain => "domain",
            ObjectKind::Index => "index",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Role => "role",
            ObjectKind::User => "user",
            ObjectKind::Check => "check",
            ObjectKind::View => "view",
            ObjectKind::Row => "row",
        }
    }
}

/// Live schema objects and rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub(crate) tables: BTreeMap<Position, Table>,
    pub(crate) columns: BTreeMap<Position, Column>,
    pub(crate) domains: BTreeMap<Position, Domain>,
    pub(crate) indexes: BTreeMap<Position, Index>,
    pub(crate) procedures: BTreeMap<Position, Procedure>,
    pub(crate) triggers: BTreeMap<Position, Trigger>,
    pub(crate) checks: BTreeMap<Position, Check>,
    pub(crate) views: BTreeMap<Position, View>,
    pub(crate) roles: BTreeMap<Position, Role>,
    pub(crate) users: BTreeMap<Position, User>,
    pub(crate) rows: BTreeMap<Position, Row>,
    pub(crate) role_names: BTreeMap<String, Position>,
    pub(crate) user_names: BTreeMap<String, Position>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub const DEFAULT_ROLE_NAME: &'static str = "PUBLIC";
    pub const DEFAULT_USER_NAME: &'static str = "SYSTEM";

    /// Empty catalog holding only the built-in role and user.
    pub fn new() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            Position::DEFAULT_ROLE,
            Role {
                pos: Position::DEFAULT_ROLE,
                name: Self::DEFAULT_ROLE_NAME.to_string(),
                details: String::new(),
                names: BTreeMap::new(),
                privileges: BTreeMap::new(),
            },
        );
        let mut users = BTreeMap::new();
        users.insert(
            Position::DEFAULT_USER,
            User {
                pos: Position::DEFAULT_USER,
                name: Self::DEFAULT_USER_NAME.to_string(),
                privileges: BTreeMap::new(),
            },
        );
        let mut role_names = BTreeMap::new();
        role_names.insert(Self::DEFAULT_ROLE_NAME.to_string(), Position::DEFAULT_ROLE);
        let mut user_names = BTreeMap::new();
        user_names.insert(Self::DEFAULT_USER_NAME.to_string(), Position::DEFAULT_USER);

        Self {
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            domains: BTreeMap::new(),
            indexes: BTreeMap::new(),
            procedures: BTreeMap::new(),
            triggers: BTreeMap::new(),
            checks: BTreeMap::new(),
            views: BTreeMap::new(),
            roles,
            users,
            rows: BTreeMap::new(),
            role_names,
            user_names,
        }
    }

    pub fn kind_of(&self, pos: Position) -> Option<ObjectKind> {
        if self.tables.contains_key(&pos) {
            Some(ObjectKind::Table)
        } else if self.columns.contains_key(&pos) {
            Some(ObjectKind::Column)
        } else if self.rows.contains_key(&pos) {
            Some(ObjectKind::Row)
        } else if self.indexes.contains_key(&pos) {
            Some(ObjectKind::Index)
        } else if self.domains.contains_key(&pos) {
            Some(ObjectKind::Domain)
        } else if self.procedures.contains_key(&pos) {
            Some(ObjectKind::Procedure)
        } else if self.triggers.contains_key(&pos) {
            Some(ObjectKind::Trigger)
        } else if self.checks.contains_key(&pos) {
            Some(ObjectKind::Check)
        } else if self.views.contains_key(&pos) {
            Some(ObjectKind::View)
        } else if self.roles.contains_key(&pos) {
            Some(ObjectKind::Role)
        } else if self.users.contains_key(&pos) {
            Some(ObjectKind::User)
        } else {
            None
        }
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.kind_of(pos).is_some()
    }

    pub fn table(&self, pos: Position) -> Option<&Table> {
        self.tables.get(&pos)
    }

    pub fn column(&self, pos: Position) -> Option<&Column> {
        self.columns.get(&pos)
    }

    pub fn domain(&self, pos: Position) -> Option<&Domain> {
        self.domains.get(&pos)
    }

    pub fn index(&self, pos: Position) -> Option<&Index> {
        self.indexes.get(&pos)
    }

    pub fn procedure(&self, pos: Position) -> Option<&Procedure> {
        self.procedures.get(&pos)
    }

    pub fn trigger(&self, pos: Position) -> Option<&Trigger> {
        self.triggers.get(&pos)
    }

    pub fn check(&self, pos: Position) -> Option<&Check> {
        self.checks.get(&pos)
    }

    pub fn view(&self, pos: Position) -> Option<&View> {
        self.views.get(&pos)
    }

    pub fn role(&self, pos: Position) -> Option<&Role> {
        self.roles.get(&pos)
    }

    pub fn user(&self, pos: Position) -> Option<&User> {
        self.users.get(&pos)
    }

    pub fn row(&self, pos: Position) -> Option<&Row> {
        self.rows.get(&pos)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Rows of a table in position order.
    pub fn rows_of(&self, table: Position) -> impl Iterator<Item = &Row> {
        self.tables
            .get(&table)
            .into_iter()
            .flat_map(|t| t.rows.iter())
            .filter_map(|r| self.rows.get(r))
    }

    pub fn indexes_of(&self, table: Position) -> impl Iterator<Item = &Index> {
        self.tables
            .get(&table)
            .into_iter()
            .flat_map(|t| t.indexes.iter())
            .filter_map(|i| self.indexes.get(i))
    }

    /// Objects `pos` belongs to: a row's tables, the table of a column,
    /// index, trigger or method, and the target of a check.
    pub fn owners(&self, pos: Position) -> Vec<Position> {
        if let Some(row) = self.rows.get(&pos) {
            return row.tables.clone();
        }
        let owner = match self.kind_of(pos) {
            Some(ObjectKind::Column) => self.columns.get(&pos).map(|c| c.table),
            Some(ObjectKind::Index) => self.indexes.get(&pos).map(|i| i.table),
            Some(ObjectKind::Trigger) => self.triggers.get(&pos).map(|t| t.table),
            Some(ObjectKind::Check) => self.checks.get(&pos).map(|c| c.target),
            Some(ObjectKind::Procedure) => self.procedures.get(&pos).and_then(|p| p.owner_type),
            _ => None,
        };
        let mut owners: Vec<Position> = owner.into_iter().collect();
        // A check on a column belongs to the column's table too
        if let Some(table) = owner.and_then(|o| self.columns.get(&o)).map(|c| c.table) {
            owners.push(table);
        }
        owners
    }

    /// Resolves a name bound in a role's name table.
    pub fn lookup(&self, role: Position, name: &str) -> Option<Position> {
        self.roles.get(&role).and_then(|r| r.names.get(name)).copied()
    }

    pub fn role_named(&self, name: &str) -> Option<Position> {
        self.role_names.get(name).copied()
    }

    pub fn user_named(&self, name: &str) -> Option<Position> {
        self.user_names.get(name).copied()
    }

    pub fn column_named(&self, table: Position, name: &str) -> Option<Position> {
        self.tables.get(&table).and_then(|t| {
            t.columns
                .iter()
                .copied()
                .find(|c| self.columns.get(c).is_some_and(|col| col.name == name))
        })
    }

    /// Field value of a row, falling back to the column default.
    pub fn value_of(&self, row: &Row, column: Position) -> Value {
        match row.fields.get(&column) {
            Some(v) => v.clone(),
            None => self
                .columns
                .get(&column)
                .map(|c| c.default.clone())
                .unwrap_or(Value::Null),
        }
    }

    /// Key of `fields` for an index, with absent columns taken from defaults.
    pub fn key_of(&self, index: &Index, fields: &Fields) -> Key {
        index
            .columns
            .iter()
            .map(|c| match fields.get(c) {
                Some(v) => v.clone(),
                None => self
                    .columns
                    .get(c)
                    .map(|col| col.default.clone())
                    .unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Privileges the role and user hold on an object.
    pub fn privileges(&self, role: Position, user: Position, object: Position) -> Privilege {
        let mut held = Privilege::NONE;
        if let Some(r) = self.roles.get(&role) {
            held |= r.privileges.get(&object).copied().unwrap_or_default();
        }
        if let Some(u) = self.users.get(&user) {
            held |= u.privileges.get(&object).copied().unwrap_or_default();
        }
        held
    }

    /// Number of live rows across all tables.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
