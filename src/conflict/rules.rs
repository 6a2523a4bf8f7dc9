//! The pairwise conflict matrix
//!
//! `rule(a, b)` answers for the kind of `a` only. The caller runs it both
//! ways round, so a rule never has to look for its own kind on the `b` side.

use super::errors::ConflictCode;
use super::ConflictContext;
use crate::catalog::{Index, Key, ObjectKind};
use crate::physical::{
    Alter, Body, Change, DataChange, Definition, DropObject, Edit, Fields, Grant, Modification,
    Modify, Physical,
};
use crate::position::Position;

/// Code of a fired rule and the object it fired on.
pub(super) type Finding = (ConflictCode, Option<Position>);

/// Namespace a name is bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Tables, views, domains and procedures
    Schema,
    /// Column names of a table
    Columns(Position),
    /// Index, trigger, check and method names of a table
    Table(Position),
    Roles,
    Users,
}

pub(super) fn rule(a: &Physical, b: &Physical, ctx: &ConflictContext<'_>) -> Option<Finding> {
    match &a.body {
        Body::Modification(Modification::Drop(d)) => drop_rule(d, b, ctx),
        Body::Modification(Modification::Alter(x)) => alter_rule(x, b),
        Body::Modification(Modification::Change(c)) => change_rule(c, b, ctx),
        Body::Modification(Modification::Grant(g)) | Body::Modification(Modification::Revoke(g)) => {
            grant_rule(g, b)
        }
        Body::Modification(Modification::Modify(m)) => modify_rule(m, b),
        Body::Modification(Modification::Edit(e)) => edit_rule(e, b, ctx),
        Body::Definition(d) => definition_rule(d, b),
        Body::Data(d) => match &b.body {
            Body::Data(e) => data_rule(d, e, ctx),
            _ => None,
        },
        Body::Control(_) => None,
    }
}

// ==================
// Modifications
// ==================

fn drop_rule(d: &DropObject, b: &Physical, ctx: &ConflictContext<'_>) -> Option<Finding> {
    let target = d.target;
    if let Body::Modification(Modification::Drop(other)) = &b.body {
        if other.target == target {
            return Some((ConflictCode::DroppedReference, Some(target)));
        }
    }
    if b.refers_to(target) {
        let code = match &b.body {
            Body::Data(change) if change.writes_column(target) => ConflictCode::DroppedColumn,
            Body::Data(change) if change.touches_table(target) => ConflictCode::DroppedTable,
            _ => ConflictCode::DroppedReference,
        };
        return Some((code, Some(target)));
    }

    // Columns, indexes and the other parts go with the dropped object
    let mut parts = ctx.snapshot.parts(target);
    parts.extend(ctx.current.parts(target));
    parts.remove(&target);
    let part = b.references().into_iter().find(|r| parts.contains(r))?;
    let code = match &b.body {
        Body::Data(change) if change.writes_column(part) => ConflictCode::DroppedColumn,
        _ => ConflictCode::DroppedReference,
    };
    let object = match &b.body {
        Body::Definition(_) => b.pos,
        _ => part,
    };
    Some((code, Some(object)))
}

fn alter_rule(x: &Alter, b: &Physical) -> Option<Finding> {
    let column = x.target;
    let code = match &b.body {
        Body::Modification(Modification::Alter(other)) if other.target == column => {
            ConflictCode::ObjectModified
        }
        Body::Modification(Modification::Change(c)) if c.target == column => ConflictCode::ObjectModified,
        Body::Definition(Definition::Index(i)) if i.columns.contains(&column) => {
            ConflictCode::AlteredIndexedColumn
        }
        Body::Definition(Definition::Check(c)) if c.target == column || c.body.names(column) => {
            ConflictCode::AlteredIndexedColumn
        }
        Body::Data(DataChange::Insert(i)) if i.fields.contains_key(&column) => {
            ConflictCode::AlteredInsertedColumn
        }
        Body::Data(DataChange::Update(u)) if u.fields.contains_key(&column) => {
            ConflictCode::AlteredUpdatedColumn
        }
        _ => return None,
    };
    Some((code, Some(column)))
}

fn change_rule(c: &Change, b: &Physical, ctx: &ConflictContext<'_>) -> Option<Finding> {
    match &b.body {
        Body::Modification(Modification::Change(other)) if other.target == c.target => {
            Some((ConflictCode::ObjectModified, Some(c.target)))
        }
        Body::Modification(Modification::Modify(m)) if m.target == c.target => {
            Some((ConflictCode::ObjectModified, Some(c.target)))
        }
        Body::Modification(Modification::Change(other)) => {
            let ours = object_scope(ctx, c.target)?;
            let theirs = object_scope(ctx, other.target)?;
            (ours == theirs && c.name == other.name).then_some((ConflictCode::DuplicateName, Some(c.target)))
        }
        Body::Definition(d) => {
            let scope = object_scope(ctx, c.target)?;
            let (other_scope, other_name) = definition_scope(d);
            (scope == other_scope && c.name == other_name)
                .then_some((ConflictCode::DuplicateName, Some(c.target)))
        }
        _ => None,
    }
}

fn grant_rule(g: &Grant, b: &Physical) -> Option<Finding> {
    let hit = match &b.body {
        Body::Modification(Modification::Grant(other)) | Body::Modification(Modification::Revoke(other)) => {
            other.object == g.object && other.grantee == g.grantee
        }
        Body::Modification(Modification::Alter(a)) => a.target == g.object,
        Body::Modification(Modification::Change(c)) => c.target == g.object,
        Body::Modification(Modification::Modify(m)) => m.target == g.object,
        Body::Modification(Modification::Edit(e)) => e.target == g.object,
        _ => false,
    };
    hit.then_some((ConflictCode::PrivilegeChanged, Some(g.object)))
}

fn modify_rule(m: &Modify, b: &Physical) -> Option<Finding> {
    match &b.body {
        Body::Modification(Modification::Modify(other)) if other.target == m.target => {
            Some((ConflictCode::ObjectModified, Some(m.target)))
        }
        _ => None,
    }
}

/// Columns declared over `domain` in either catalog.
fn domain_columns(ctx: &ConflictContext<'_>, domain: Position) -> Vec<Position> {
    let mut columns: Vec<Position> = [ctx.snapshot, ctx.current]
        .into_iter()
        .flat_map(|catalog| catalog.columns.values())
        .filter(|c| c.domain == Some(domain))
        .map(|c| c.pos)
        .collect();
    columns.sort();
    columns.dedup();
    columns
}

fn edit_rule(e: &Edit, b: &Physical, ctx: &ConflictContext<'_>) -> Option<Finding> {
    let domain = e.target;
    match &b.body {
        Body::Modification(Modification::Edit(other)) if other.target == domain => {
            Some((ConflictCode::ObjectModified, Some(domain)))
        }
        Body::Modification(Modification::Change(c)) if c.target == domain => {
            Some((ConflictCode::ObjectModified, Some(domain)))
        }
        Body::Modification(Modification::Alter(a)) if a.column.domain == Some(domain) => {
            Some((ConflictCode::ObjectModified, Some(a.target)))
        }
        Body::Definition(Definition::Column(c)) if c.domain == Some(domain) => {
            Some((ConflictCode::ObjectModified, Some(domain)))
        }
        Body::Data(change) => {
            let column = domain_columns(ctx, domain)
                .into_iter()
                .find(|c| change.writes_column(*c))?;
            let code = match change {
                DataChange::Insert(_) => ConflictCode::AlteredInsertedColumn,
                _ => ConflictCode::AlteredUpdatedColumn,
            };
            Some((code, Some(column)))
        }
        _ => None,
    }
}

// ==================
// Definitions
// ==================

fn definition_scope(d: &Definition) -> (Scope, String) {
    match d {
        Definition::Table(t) => (Scope::Schema, t.name.clone()),
        Definition::View(v) => (Scope::Schema, v.name.clone()),
        Definition::Domain(x) => (Scope::Schema, x.name.clone()),
        Definition::Procedure(p) => match p.owner_type {
            None => (Scope::Schema, format!("{}${}", p.name, p.arity)),
            Some(owner) => (Scope::Table(owner), format!("{}${}", p.name, p.arity)),
        },
        Definition::Column(c) => (Scope::Columns(c.table), c.name.clone()),
        Definition::Index(i) => (Scope::Table(i.table), i.name.clone()),
        Definition::Trigger(t) => (Scope::Table(t.table), t.name.clone()),
        Definition::Check(c) => (Scope::Table(c.target), c.name.clone()),
        Definition::Role(r) => (Scope::Roles, r.name.clone()),
        Definition::User(u) => (Scope::Users, u.name.clone()),
    }
}

/// Scope an existing object's name lives in, from either catalog.
fn object_scope(ctx: &ConflictContext<'_>, pos: Position) -> Option<Scope> {
    [ctx.snapshot, ctx.current].into_iter().find_map(|catalog| {
        let scope = match catalog.kind_of(pos)? {
            ObjectKind::Table | ObjectKind::View | ObjectKind::Domain => Scope::Schema,
            ObjectKind::Procedure => match catalog.procedure(pos)?.owner_type {
                None => Scope::Schema,
                Some(owner) => Scope::Table(owner),
            },
            ObjectKind::Column => Scope::Columns(catalog.column(pos)?.table),
            ObjectKind::Index => Scope::Table(catalog.index(pos)?.table),
            ObjectKind::Trigger => Scope::Table(catalog.trigger(pos)?.table),
            ObjectKind::Check => Scope::Table(catalog.check(pos)?.target),
            ObjectKind::Role => Scope::Roles,
            ObjectKind::User => Scope::Users,
            ObjectKind::Row => return None,
        };
        Some(scope)
    })
}

/// Table whose structure a definition changes, for index, trigger and check.
fn table_component(d: &Definition) -> Option<Position> {
    match d {
        Definition::Index(i) => Some(i.table),
        Definition::Trigger(t) => Some(t.table),
        Definition::Check(c) => Some(c.target),
        _ => None,
    }
}

fn definition_rule(d: &Definition, b: &Physical) -> Option<Finding> {
    match &b.body {
        Body::Definition(other) => {
            if let (Some(t), Some(u)) = (table_component(d), table_component(other)) {
                return (t == u).then_some((ConflictCode::TableDefinitionChanged, Some(t)));
            }
            let (scope, name) = definition_scope(d);
            let (other_scope, other_name) = definition_scope(other);
            if scope != other_scope || name != other_name {
                return None;
            }
            match scope {
                Scope::Columns(table) => Some((ConflictCode::DuplicateColumn, Some(table))),
                _ => Some((ConflictCode::DuplicateName, None)),
            }
        }
        Body::Modification(Modification::Alter(a)) => match d {
            Definition::Column(c) if c.table == a.column.table => {
                Some((ConflictCode::ColumnAdded, Some(c.table)))
            }
            _ => None,
        },
        Body::Data(DataChange::Update(u)) => match d {
            Definition::Column(c) if c.table == u.table => Some((ConflictCode::ColumnAdded, Some(c.table))),
            _ => None,
        },
        _ => None,
    }
}

// ==================
// Data changes
// ==================

/// Row fields as the transaction that changed the row last saw them.
fn row_fields(ctx: &ConflictContext<'_>, row: Position) -> Fields {
    ctx.snapshot
        .row(row)
        .or_else(|| ctx.current.row(row))
        .map(|r| r.fields.clone())
        .unwrap_or_default()
}

/// Full field map after an insert or update.
fn new_fields(ctx: &ConflictContext<'_>, change: &DataChange) -> Option<Fields> {
    match change {
        DataChange::Insert(i) => Some(i.fields.clone()),
        DataChange::Update(u) => {
            let mut fields = row_fields(ctx, u.row);
            fields.extend(u.fields.iter().map(|(c, v)| (*c, v.clone())));
            Some(fields)
        }
        DataChange::Delete(_) => None,
    }
}

fn tables_of(change: &DataChange) -> Vec<Position> {
    match change {
        DataChange::Insert(i) => std::iter::once(i.table).chain(i.extra_tables.iter().copied()).collect(),
        _ => vec![change.table()],
    }
}

fn indexes<'c>(ctx: &ConflictContext<'c>, change: &DataChange) -> Vec<&'c Index> {
    tables_of(change)
        .into_iter()
        .flat_map(|t| ctx.current.indexes_of(t))
        .collect()
}

fn key(ctx: &ConflictContext<'_>, index: &Index, fields: &Fields) -> Key {
    ctx.current.key_of(index, fields)
}

/// Key an insert or update writes to `index`, if the change sets a new one.
fn written_key(ctx: &ConflictContext<'_>, change: &DataChange, index: &Index) -> Option<Key> {
    let fields = new_fields(ctx, change)?;
    let new = key(ctx, index, &fields);
    if new.iter().any(|v| v.is_null()) {
        return None;
    }
    if let DataChange::Update(u) = change {
        if key(ctx, index, &row_fields(ctx, u.row)) == new {
            return None;
        }
    }
    Some(new)
}

fn data_rule(a: &DataChange, b: &DataChange, ctx: &ConflictContext<'_>) -> Option<Finding> {
    match (a, b) {
        (DataChange::Delete(x), DataChange::Delete(y)) if x.row == y.row => {
            return Some((ConflictCode::RowDeletedTwice, Some(x.row)))
        }
        (DataChange::Update(x), DataChange::Update(y)) if x.row == y.row => {
            return Some((ConflictCode::RowChanged, Some(x.row)))
        }
        (DataChange::Update(x), DataChange::Delete(y)) if x.row == y.row => {
            return Some((ConflictCode::RowChanged, Some(x.row)))
        }
        _ => {}
    }
    if matches!(a, DataChange::Delete(_)) {
        return None;
    }

    for index in indexes(ctx, a) {
        let Some(ours) = written_key(ctx, a, index) else {
            continue;
        };

        if index.flags.is_unique() && tables_of(b).contains(&index.table) {
            if written_key(ctx, b, index).as_ref() == Some(&ours) {
                return Some((ConflictCode::DuplicateKey, Some(index.pos)));
            }
        }

        if !index.flags.is_foreign() {
            continue;
        }
        let Some(target) = index.references.and_then(|r| ctx.current.index(r)) else {
            continue;
        };
        match b {
            DataChange::Delete(d) if d.table == target.table => {
                let fields = row_fields(ctx, d.row);
                if key(ctx, target, &fields) == ours {
                    let code = match a {
                        DataChange::Insert(_) => ConflictCode::InsertReferencesDeleted,
                        _ => ConflictCode::UpdateReferencesDeleted,
                    };
                    return Some((code, Some(d.row)));
                }
            }
            DataChange::Update(u) if u.table == target.table => {
                let old = key(ctx, target, &row_fields(ctx, u.row));
                if old == ours && written_key(ctx, b, target).is_some() {
                    return Some((ConflictCode::ReferencedKeyChanged, Some(target.pos)));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, InstallContext};
    use crate::physical::{
        ColumnDef, DataType, Delete, DropAction, IndexDef, IndexFlags, Insert, Privilege,
        RoleDef, TableDef, Update, Value,
    };
    use std::collections::BTreeMap;

    /// P(id pk) at 100/110/120 and C(p fk) at 200/210/220, parent row 300
    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        let mut ctx = InstallContext::default();
        let mut put = |pos: u64, body: Body| {
            c.install(&Physical::new(Position::new(pos), body), &mut ctx).unwrap();
        };
        let col = |table: u64, name: &str| ColumnDef {
            table: Position::new(table),
            name: name.into(),
            seq: 0,
            data_type: DataType::Integer,
            domain: None,
            default: Value::Null,
            not_null: false,
        };
        put(100, TableDef { name: "P".into() }.into());
        put(110, col(100, "id").into());
        put(
            120,
            IndexDef {
                name: "pk".into(),
                table: Position::new(100),
                columns: vec![Position::new(110)],
                flags: IndexFlags::PRIMARY_KEY,
                references: None,
            }
            .into(),
        );
        put(200, TableDef { name: "C".into() }.into());
        put(210, col(200, "p").into());
        put(
            220,
            IndexDef {
                name: "fk".into(),
                table: Position::new(200),
                columns: vec![Position::new(210)],
                flags: IndexFlags::FOREIGN_KEY,
                references: Some(Position::new(120)),
            }
            .into(),
        );
        put(
            300,
            Insert {
                table: Position::new(100),
                extra_tables: vec![],
                fields: [(Position::new(110), Value::Integer(1))].into_iter().collect(),
            }
            .into(),
        );
        c
    }

    fn insert(table: u64, col: u64, v: i64) -> Physical {
        Physical::new(
            Position::local(1),
            Insert {
                table: Position::new(table),
                extra_tables: vec![],
                fields: [(Position::new(col), Value::Integer(v))].into_iter().collect(),
            },
        )
    }

    #[test]
    fn test_same_primary_key_conflicts() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let ours = insert(100, 110, 7);
        let theirs = Physical::new(Position::new(500), insert(100, 110, 7).body);
        assert_eq!(
            rule(&ours, &theirs, &ctx),
            Some((ConflictCode::DuplicateKey, Some(Position::new(120))))
        );
        let other = Physical::new(Position::new(500), insert(100, 110, 8).body);
        assert_eq!(rule(&ours, &other, &ctx), None);
    }

    #[test]
    fn test_insert_referencing_deleted_row() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let ours = insert(200, 210, 1);
        let theirs = Physical::new(
            Position::new(500),
            Delete {
                row: Position::new(300),
                table: Position::new(100),
            },
        );
        assert_eq!(
            rule(&ours, &theirs, &ctx),
            Some((ConflictCode::InsertReferencesDeleted, Some(Position::new(300))))
        );
    }

    #[test]
    fn test_referenced_key_update_vs_insert() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let ours = insert(200, 210, 1);
        let mut fields = BTreeMap::new();
        fields.insert(Position::new(110), Value::Integer(2));
        let theirs = Physical::new(
            Position::new(500),
            Update {
                row: Position::new(300),
                prev: Position::new(300),
                table: Position::new(100),
                fields,
            },
        );
        assert_eq!(
            rule(&ours, &theirs, &ctx),
            Some((ConflictCode::ReferencedKeyChanged, Some(Position::new(120))))
        );
    }

    #[test]
    fn test_update_keeping_key_does_not_collide() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let mut fields = BTreeMap::new();
        fields.insert(Position::new(110), Value::Integer(1));
        let ours = Physical::new(
            Position::local(1),
            Update {
                row: Position::new(300),
                prev: Position::new(300),
                table: Position::new(100),
                fields,
            },
        );
        let theirs = Physical::new(Position::new(500), insert(100, 110, 1).body);
        assert_eq!(rule(&ours, &theirs, &ctx), None);
    }

    #[test]
    fn test_concurrent_columns_with_one_name() {
        let c = Catalog::new();
        let ctx = ConflictContext::new(&c, &c);
        let def = |pos| {
            Physical::new(
                pos,
                ColumnDef {
                    table: Position::new(100),
                    name: "a".into(),
                    seq: 0,
                    data_type: DataType::Integer,
                    domain: None,
                    default: Value::Null,
                    not_null: false,
                },
            )
        };
        assert_eq!(
            rule(&def(Position::local(1)), &def(Position::new(400)), &ctx),
            Some((ConflictCode::DuplicateColumn, Some(Position::new(100))))
        );
    }

    #[test]
    fn test_rename_onto_new_name() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let rename = Physical::new(
            Position::local(1),
            Change {
                target: Position::new(100),
                name: "Q".into(),
            },
        );
        let table = Physical::new(Position::new(500), TableDef { name: "Q".into() });
        assert_eq!(
            rule(&rename, &table, &ctx).map(|f| f.0),
            Some(ConflictCode::DuplicateName)
        );
    }

    #[test]
    fn test_grant_vs_revoke_same_pair() {
        let c = Catalog::new();
        let ctx = ConflictContext::new(&c, &c);
        let g = Grant {
            privilege: Privilege::SELECT,
            object: Position::new(100),
            grantee: Position::new(700),
        };
        let ours = Physical::new(Position::local(1), Body::Modification(Modification::Grant(g.clone())));
        let theirs = Physical::new(Position::new(500), Body::Modification(Modification::Revoke(g)));
        assert_eq!(
            rule(&ours, &theirs, &ctx),
            Some((ConflictCode::PrivilegeChanged, Some(Position::new(100))))
        );
    }

    #[test]
    fn test_drop_of_grantee_vs_grant() {
        let ours = Physical::new(
            Position::local(1),
            DropObject {
                target: Position::new(700),
                action: DropAction::Restrict,
            },
        );
        let grant = Physical::new(
            Position::new(500),
            Body::Modification(Modification::Grant(Grant {
                privilege: Privilege::SELECT,
                object: Position::new(100),
                grantee: Position::new(700),
            })),
        );
        let c = Catalog::new();
        let ctx = ConflictContext::new(&c, &c);
        assert_eq!(
            rule(&ours, &grant, &ctx),
            Some((ConflictCode::DroppedReference, Some(Position::new(700))))
        );
        let role = Physical::new(
            Position::new(500),
            RoleDef {
                name: "r".into(),
                details: String::new(),
            },
        );
        assert!(rule(&ours, &role, &ctx).is_none());
    }

    #[test]
    fn test_table_drop_vs_foreign_key_on_its_index() {
        let c = catalog();
        let ctx = ConflictContext::new(&c, &c);
        let drop = Physical::new(
            Position::local(1),
            DropObject {
                target: Position::new(100),
                action: DropAction::Cascade,
            },
        );
        let fk = Physical::new(
            Position::new(500),
            IndexDef {
                name: "fk2".into(),
                table: Position::new(200),
                columns: vec![Position::new(210)],
                flags: IndexFlags::FOREIGN_KEY,
                references: Some(Position::new(120)),
            },
        );
        assert_eq!(
            rule(&drop, &fk, &ctx),
            Some((ConflictCode::DroppedReference, Some(Position::new(500))))
        );

        let unrelated = insert(200, 210, 9);
        assert!(rule(&drop, &unrelated, &ctx).is_none());
    }

    #[test]
    fn test_domain_edit_vs_insert_writing_its_column() {
        let mut c = Catalog::new();
        let mut ictx = InstallContext::default();
        let mut put = |pos: u64, body: Body| {
            c.install(&Physical::new(Position::new(pos), body), &mut ictx).unwrap();
        };
        put(
            100,
            crate::physical::DomainDef {
                name: "amount".into(),
                data_type: DataType::Integer,
                default: Value::Null,
            }
            .into(),
        );
        put(110, TableDef { name: "T".into() }.into());
        put(
            120,
            ColumnDef {
                table: Position::new(110),
                name: "a".into(),
                seq: 0,
                data_type: DataType::Integer,
                domain: Some(Position::new(100)),
                default: Value::Null,
                not_null: false,
            }
            .into(),
        );
        let ctx = ConflictContext::new(&c, &c);

        let edit = Physical::new(
            Position::local(1),
            Edit {
                target: Position::new(100),
                domain: crate::physical::DomainDef {
                    name: "amount".into(),
                    data_type: DataType::Real,
                    default: Value::Null,
                },
            },
        );
        assert_eq!(
            rule(&edit, &insert(110, 120, 4), &ctx),
            Some((ConflictCode::AlteredInsertedColumn, Some(Position::new(120))))
        );
        assert_eq!(
            rule(&edit, &edit, &ctx),
            Some((ConflictCode::ObjectModified, Some(Position::new(100))))
        );
        assert!(rule(&edit, &insert(110, 130, 4), &ctx).is_none());
    }
}
