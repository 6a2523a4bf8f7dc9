//! Installer: applies one physical to the catalog
//!
//! Installation runs in position order, both when replaying the log at open
//! and inside the commit critical section. Every rule here is deterministic so
//! that both paths produce the same catalog.

use super::errors::{InstallError, InstallResult};
use super::{
    format_key, Catalog, Check, Column, Domain, Index, Key, ObjectKind, Procedure, Role, Row,
    Table, Trigger, User, View,
};
use crate::physical::{
    Body, ColumnDef, Control, DataChange, Definition, Edit, Fields, IndexDef, Insert, Modification,
    Physical, Privilege, ReferentialAction, Source, Value,
};
use crate::position::Position;

/// Identity under which physicals are installed.
///
/// A transaction marker resets it to the committing role and user; a
/// triggered action switches the role to the trigger's definer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallContext {
    pub role: Position,
    pub user: Position,
    /// Marker of the transaction being installed
    pub marker: Position,
}

impl Default for InstallContext {
    fn default() -> Self {
        Self::new(Position::DEFAULT_ROLE, Position::DEFAULT_USER)
    }
}

impl InstallContext {
    pub fn new(role: Position, user: Position) -> Self {
        Self {
            role,
            user,
            marker: Position::NONE,
        }
    }
}

/// Applies `physical` to a copy of `catalog`.
///
/// Returns the new catalog and the position of the affected object.
pub fn install(
    physical: &Physical,
    ctx: &mut InstallContext,
    catalog: &Catalog,
) -> InstallResult<(Catalog, Position)> {
    let mut next = catalog.clone();
    let affected = next.install(physical, ctx)?;
    Ok((next, affected))
}

pub(super) fn has_null(key: &Key) -> bool {
    key.iter().any(Value::is_null)
}

fn procedure_key(name: &str, arity: i64) -> String {
    format!("{}${}", name, arity)
}

impl Catalog {
    /// Applies one physical in place and returns the affected object.
    pub fn install(&mut self, ph: &Physical, ctx: &mut InstallContext) -> InstallResult<Position> {
        match &ph.body {
            Body::Definition(d) => self.install_definition(ph.pos, d, ctx),
            Body::Modification(m) => self.install_modification(ph.pos, m, ctx),
            Body::Data(d) => self.install_data(ph.pos, d, ctx),
            Body::Control(c) => self.install_control(ph.pos, c, ctx),
        }
    }

    // ==================
    // Helpers
    // ==================

    fn not_found(kind: &'static str, pos: Position) -> InstallError {
        InstallError::NotFound { kind, pos }
    }

    fn require(&self, ctx: &InstallContext, object: Position, wanted: Privilege) -> InstallResult<()> {
        let held = self.privileges(ctx.role, ctx.user, object);
        if held.contains(Privilege::OWNER) || held.contains(wanted) {
            Ok(())
        } else {
            Err(InstallError::AccessDenied {
                object,
                privilege: wanted,
            })
        }
    }

    /// Object whose ownership governs changes to `pos`.
    pub(super) fn owning_object(&self, pos: Position) -> Position {
        if let Some(c) = self.columns.get(&pos) {
            return c.table;
        }
        if let Some(i) = self.indexes.get(&pos) {
            return i.table;
        }
        if let Some(t) = self.triggers.get(&pos) {
            return t.table;
        }
        if let Some(c) = self.checks.get(&pos) {
            return self.owning_object(c.target);
        }
        if let Some(r) = self.rows.get(&pos) {
            return r.tables.first().copied().unwrap_or(pos);
        }
        pos
    }

    fn grant_owner(&mut self, role: Position, object: Position) {
        if let Some(r) = self.roles.get_mut(&role) {
            r.privileges.insert(object, Privilege::owner());
        }
    }

    fn bind_name(&mut self, role: Position, name: &str, pos: Position) -> InstallResult<()> {
        let r = self
            .roles
            .get_mut(&role)
            .ok_or_else(|| Self::not_found("role", role))?;
        if r.names.contains_key(name) {
            return Err(InstallError::DuplicateName {
                name: name.to_string(),
                scope: role,
            });
        }
        r.names.insert(name.to_string(), pos);
        Ok(())
    }

    pub(super) fn unbind(&mut self, pos: Position) {
        for role in self.roles.values_mut() {
            role.names.retain(|_, p| *p != pos);
        }
    }

    /// Moves every binding of `pos` to `new_name`.
    fn rebind(&mut self, pos: Position, new_name: &str) -> InstallResult<()> {
        for role in self.roles.values() {
            if role.names.values().any(|p| *p == pos) {
                if let Some(other) = role.names.get(new_name) {
                    if *other != pos {
                        return Err(InstallError::DuplicateName {
                            name: new_name.to_string(),
                            scope: role.pos,
                        });
                    }
                }
            }
        }
        for role in self.roles.values_mut() {
            if role.names.values().any(|p| *p == pos) {
                role.names.retain(|_, p| *p != pos);
                role.names.insert(new_name.to_string(), pos);
            }
        }
        Ok(())
    }

    fn check_refs(&self, source: &Source) -> InstallResult<()> {
        match source.refs.iter().find(|r| !self.contains(**r)) {
            Some(missing) => Err(Self::not_found("object", *missing)),
            None => Ok(()),
        }
    }

    pub(super) fn validate_value(&self, column: &Column, value: &Value) -> InstallResult<()> {
        if !column.data_type.admits(value) {
            return Err(InstallError::TypeMismatch {
                column: column.pos,
                value: value.to_string(),
            });
        }
        if column.not_null && value.is_null() {
            return Err(InstallError::NullValue { column: column.pos });
        }
        Ok(())
    }

    fn sort_columns(&mut self, table: Position) {
        let Some(t) = self.tables.get(&table) else {
            return;
        };
        let mut cols = t.columns.clone();
        cols.sort_by_key(|c| (self.columns.get(c).map(|col| col.seq).unwrap_or(i64::MAX), *c));
        if let Some(t) = self.tables.get_mut(&table) {
            t.columns = cols;
        }
    }

    // ==================
    // Definitions
    // ==================

    fn install_definition(
        &mut self,
        pos: Position,
        d: &Definition,
        ctx: &InstallContext,
    ) -> InstallResult<Position> {
        match d {
            Definition::Table(t) => {
                self.bind_name(ctx.role, &t.name, pos)?;
                self.tables.insert(
                    pos,
                    Table {
                        pos,
                        name: t.name.clone(),
                        columns: Vec::new(),
                        indexes: Vec::new(),
                        triggers: Vec::new(),
                        checks: Vec::new(),
                        rows: Default::default(),
                    },
                );
                self.grant_owner(ctx.role, pos);
            }
            Definition::Column(c) => self.define_column(pos, c, ctx)?,
            Definition::Domain(d) => {
                if !d.data_type.admits(&d.default) {
                    return Err(InstallError::TypeMismatch {
                        column: pos,
                        value: d.default.to_string(),
                    });
                }
                self.bind_name(ctx.role, &d.name, pos)?;
                self.domains.insert(
                    pos,
                    Domain {
                        pos,
                        name: d.name.clone(),
                        data_type: d.data_type,
                        default: d.default.clone(),
                    },
                );
                self.grant_owner(ctx.role, pos);
            }
            Definition::Index(x) => self.define_index(pos, x, ctx)?,
            Definition::Procedure(p) => {
                self.check_refs(&p.body)?;
                match p.owner_type {
                    None => self.bind_name(ctx.role, &procedure_key(&p.name, p.arity), pos)?,
                    Some(owner) => {
                        if !self.tables.contains_key(&owner) {
                            return Err(Self::not_found("table", owner));
                        }
                        self.require(ctx, owner, Privilege::OWNER)?;
                        let clash = self.procedures.values().any(|m| {
                            m.owner_type == Some(owner) && m.name == p.name && m.arity == p.arity
                        });
                        if clash {
                            return Err(InstallError::DuplicateName {
                                name: procedure_key(&p.name, p.arity),
                                scope: owner,
                            });
                        }
                    }
                }
                self.procedures.insert(
                    pos,
                    Procedure {
                        pos,
                        name: p.name.clone(),
                        arity: p.arity,
                        owner_type: p.owner_type,
                        body: p.body.clone(),
                        definer: ctx.role,
                    },
                );
                self.grant_owner(ctx.role, pos);
            }
            Definition::Trigger(t) => {
                if !self.tables.contains_key(&t.table) {
                    return Err(Self::not_found("table", t.table));
                }
                self.require(ctx, t.table, Privilege::TRIGGER)?;
                self.check_refs(&t.body)?;
                let clash = self
                    .triggers
                    .values()
                    .any(|x| x.table == t.table && x.name == t.name);
                if clash {
                    return Err(InstallError::DuplicateName {
                        name: t.name.clone(),
                        scope: t.table,
                    });
                }
                self.triggers.insert(
                    pos,
                    Trigger {
                        pos,
                        name: t.name.clone(),
                        table: t.table,
                        events: t.events,
                        body: t.body.clone(),
                        definer: ctx.role,
                    },
                );
                if let Some(table) = self.tables.get_mut(&t.table) {
                    table.triggers.push(pos);
                }
            }
            Definition::Role(r) => {
                if self.role_names.contains_key(&r.name) {
                    return Err(InstallError::DuplicateName {
                        name: r.name.clone(),
                        scope: Position::NONE,
                    });
                }
                self.roles.insert(
                    pos,
                    Role {
                        pos,
                        name: r.name.clone(),
                        details: r.details.clone(),
                        names: Default::default(),
                        privileges: Default::default(),
                    },
                );
                self.role_names.insert(r.name.clone(), pos);
                self.grant_owner(ctx.role, pos);
            }
            Definition::User(u) => {
                if self.user_names.contains_key(&u.name) {
                    return Err(InstallError::DuplicateName {
                        name: u.name.clone(),
                        scope: Position::NONE,
                    });
                }
                self.users.insert(
                    pos,
                    User {
                        pos,
                        name: u.name.clone(),
                        privileges: Default::default(),
                    },
                );
                self.user_names.insert(u.name.clone(), pos);
                self.grant_owner(ctx.role, pos);
            }
            Definition::Check(c) => {
                match self.kind_of(c.target) {
                    Some(ObjectKind::Table) | Some(ObjectKind::Column) | Some(ObjectKind::Domain) => {}
                    _ => return Err(Self::not_found("check target", c.target)),
                }
                self.require(ctx, self.owning_object(c.target), Privilege::OWNER)?;
                self.check_refs(&c.body)?;
                let clash = self
                    .checks
                    .values()
                    .any(|x| x.target == c.target && x.name == c.name);
                if clash {
                    return Err(InstallError::DuplicateName {
                        name: c.name.clone(),
                        scope: c.target,
                    });
                }
                self.checks.insert(
                    pos,
                    Check {
                        pos,
                        name: c.name.clone(),
                        target: c.target,
                        body: c.body.clone(),
                    },
                );
                if let Some(table) = self.tables.get_mut(&c.target) {
                    table.checks.push(pos);
                }
            }
            Definition::View(v) => {
                self.check_refs(&v.body)?;
                self.bind_name(ctx.role, &v.name, pos)?;
                self.views.insert(
                    pos,
                    View {
                        pos,
                        name: v.name.clone(),
                        body: v.body.clone(),
                        definer: ctx.role,
                    },
                );
                self.grant_owner(ctx.role, pos);
            }
        }
        Ok(pos)
    }

    fn define_column(&mut self, pos: Position, c: &ColumnDef, ctx: &InstallContext) -> InstallResult<()> {
        if !self.tables.contains_key(&c.table) {
            return Err(Self::not_found("table", c.table));
        }
        self.require(ctx, c.table, Privilege::OWNER)?;
        if self.column_named(c.table, &c.name).is_some() {
            return Err(InstallError::DuplicateName {
                name: c.name.clone(),
                scope: c.table,
            });
        }
        if let Some(domain) = c.domain {
            if !self.domains.contains_key(&domain) {
                return Err(Self::not_found("domain", domain));
            }
        }
        let column = Column {
            pos,
            table: c.table,
            name: c.name.clone(),
            seq: c.seq,
            data_type: c.data_type,
            domain: c.domain,
            default: c.default.clone(),
            not_null: c.not_null,
            version: pos,
        };
        if !column.data_type.admits(&column.default) {
            return Err(InstallError::TypeMismatch {
                column: pos,
                value: column.default.to_string(),
            });
        }
        if column.not_null && column.default.is_null() && self.rows_of(c.table).next().is_some() {
            return Err(InstallError::NullValue { column: pos });
        }

        self.columns.insert(pos, column);
        if let Some(t) = self.tables.get_mut(&c.table) {
            t.columns.push(pos);
        }
        self.sort_columns(c.table);
        Ok(())
    }

    fn define_index(&mut self, pos: Position, x: &IndexDef, ctx: &InstallContext) -> InstallResult<()> {
        let table = self
            .tables
            .get(&x.table)
            .ok_or_else(|| Self::not_found("table", x.table))?;
        if x.columns.is_empty() {
            return Err(InstallError::Invalid(format!("index {} has no key columns", x.name)));
        }
        for c in &x.columns {
            match self.columns.get(c) {
                Some(col) if col.table == x.table => {}
                Some(_) => {
                    return Err(InstallError::Invalid(format!(
                        "column {} does not belong to table {}",
                        c, x.table
                    )))
                }
                None => return Err(Self::not_found("column", *c)),
            }
        }
        let clash = table
            .indexes
            .iter()
            .filter_map(|i| self.indexes.get(i))
            .any(|i| i.name == x.name);
        if clash {
            return Err(InstallError::DuplicateName {
                name: x.name.clone(),
                scope: x.table,
            });
        }
        self.require(ctx, x.table, Privilege::OWNER)?;

        let target = if x.flags.is_foreign() {
            let refs = x
                .references
                .ok_or_else(|| InstallError::Invalid(format!("foreign key {} names no index", x.name)))?;
            let target = self
                .indexes
                .get(&refs)
                .ok_or_else(|| Self::not_found("index", refs))?;
            if !target.flags.is_unique() || target.columns.len() != x.columns.len() {
                return Err(InstallError::Invalid(format!(
                    "foreign key {} must reference a unique index of the same arity",
                    x.name
                )));
            }
            self.require(ctx, target.table, Privilege::REFERENCES)?;
            Some(refs)
        } else {
            if x.references.is_some() {
                return Err(InstallError::Invalid(format!(
                    "index {} references another index but is not a foreign key",
                    x.name
                )));
            }
            None
        };

        let mut index = Index {
            pos,
            name: x.name.clone(),
            table: x.table,
            columns: x.columns.clone(),
            flags: x.flags,
            references: target,
            referenced_by: Vec::new(),
            keys: Default::default(),
        };
        let mut keys: std::collections::BTreeMap<Key, std::collections::BTreeSet<Position>> =
            Default::default();
        for row in self.rows_of(x.table) {
            let key = self.key_of(&index, &row.fields);
            self.check_key(&index, &key, row, &keys)?;
            keys.entry(key).or_default().insert(row.pos);
        }
        index.keys = keys;

        self.indexes.insert(pos, index);
        if let Some(t) = self.tables.get_mut(&x.table) {
            t.indexes.push(pos);
        }
        if let Some(refs) = target {
            if let Some(r) = self.indexes.get_mut(&refs) {
                r.referenced_by.push(pos);
            }
        }
        Ok(())
    }

    /// Checks one key of `row` against an index's constraint.
    ///
    /// `existing` holds the index's current key map, which may be under
    /// construction.
    fn check_key(
        &self,
        index: &Index,
        key: &Key,
        row: &Row,
        existing: &std::collections::BTreeMap<Key, std::collections::BTreeSet<Position>>,
    ) -> InstallResult<()> {
        if index.flags.contains(crate::physical::IndexFlags::PRIMARY_KEY) {
            if let Some((col, _)) = index.columns.iter().zip(key).find(|(_, v)| v.is_null()) {
                return Err(InstallError::NullValue { column: *col });
            }
        }
        if has_null(key) {
            return Ok(());
        }
        if index.flags.is_unique() {
            let holder = existing
                .get(key)
                .and_then(|rows| rows.iter().copied().find(|r| *r != row.pos));
            if let Some(holder) = holder {
                return Err(InstallError::DuplicateKey {
                    index: index.pos,
                    existing: holder,
                    key: format_key(key),
                });
            }
        }
        if index.flags.is_foreign() {
            let satisfied = index.references.and_then(|r| self.indexes.get(&r)).is_some_and(|target| {
                target.contains_key(key)
                    || (row.tables.contains(&target.table)
                        && self.key_of(target, &row.fields) == *key)
            });
            if !satisfied {
                return Err(InstallError::MissingReference {
                    index: index.pos,
                    key: format_key(key),
                });
            }
        }
        Ok(())
    }

    // ==================
    // Modifications
    // ==================

    fn install_modification(
        &mut self,
        pos: Position,
        m: &Modification,
        ctx: &InstallContext,
    ) -> InstallResult<Position> {
        match m {
            Modification::Alter(a) => {
                let current = self
                    .columns
                    .get(&a.target)
                    .ok_or_else(|| Self::not_found("column", a.target))?;
                if current.table != a.column.table {
                    return Err(InstallError::Invalid(format!(
                        "column {} cannot move to table {}",
                        a.target, a.column.table
                    )));
                }
                let table = current.table;
                self.require(ctx, table, Privilege::OWNER)?;
                if let Some(other) = self.column_named(table, &a.column.name) {
                    if other != a.target {
                        return Err(InstallError::DuplicateName {
                            name: a.column.name.clone(),
                            scope: table,
                        });
                    }
                }
                if let Some(domain) = a.column.domain {
                    if !self.domains.contains_key(&domain) {
                        return Err(Self::not_found("domain", domain));
                    }
                }
                let altered = Column {
                    pos: a.target,
                    table,
                    name: a.column.name.clone(),
                    seq: a.column.seq,
                    data_type: a.column.data_type,
                    domain: a.column.domain,
                    default: a.column.default.clone(),
                    not_null: a.column.not_null,
                    version: pos,
                };
                self.validate_value(&altered, &altered.default)
                    .or_else(|e| match e {
                        InstallError::NullValue { .. } => Ok(()),
                        other => Err(other),
                    })?;
                for row in self.rows_of(table) {
                    let value = row
                        .fields
                        .get(&a.target)
                        .cloned()
                        .unwrap_or_else(|| altered.default.clone());
                    self.validate_value(&altered, &value)?;
                }
                self.columns.insert(a.target, altered);
                self.sort_columns(table);
                Ok(a.target)
            }
            Modification::Change(c) => {
                self.require(ctx, self.owning_object(c.target), Privilege::OWNER)?;
                self.rename(c.target, &c.name)?;
                Ok(c.target)
            }
            Modification::Drop(d) => {
                if !self.contains(d.target) {
                    return Err(Self::not_found("object", d.target));
                }
                self.require(ctx, self.owning_object(d.target), Privilege::OWNER)?;
                self.drop_object(d.target, d.action)?;
                Ok(d.target)
            }
            Modification::Grant(g) | Modification::Revoke(g) => {
                if !self.contains(g.object) {
                    return Err(Self::not_found("object", g.object));
                }
                if !self.roles.contains_key(&g.grantee) && !self.users.contains_key(&g.grantee) {
                    return Err(Self::not_found("grantee", g.grantee));
                }
                self.require(ctx, g.object, g.privilege.with_grant_option())?;
                let revoke = matches!(m, Modification::Revoke(_));
                let privileges = match self.roles.get_mut(&g.grantee) {
                    Some(role) => &mut role.privileges,
                    None => match self.users.get_mut(&g.grantee) {
                        Some(user) => &mut user.privileges,
                        None => return Err(Self::not_found("grantee", g.grantee)),
                    },
                };
                let held = privileges.get(&g.object).copied().unwrap_or_default();
                let next = if revoke {
                    held.without(g.privilege).without(g.privilege.with_grant_option())
                } else {
                    held | g.privilege
                };
                if next.is_empty() {
                    privileges.remove(&g.object);
                } else {
                    privileges.insert(g.object, next);
                }
                Ok(g.object)
            }
            Modification::Modify(md) => {
                self.require(ctx, md.target, Privilege::OWNER)?;
                self.check_refs(&md.body)?;
                if let Some(p) = self.procedures.get(&md.target) {
                    let (arity, is_method) = (p.arity, p.owner_type.is_some());
                    if p.name != md.name && !is_method {
                        self.rebind(md.target, &procedure_key(&md.name, arity))?;
                    }
                    if let Some(p) = self.procedures.get_mut(&md.target) {
                        p.name = md.name.clone();
                        p.body = md.body.clone();
                    }
                } else if let Some(v) = self.views.get(&md.target) {
                    if v.name != md.name {
                        self.rebind(md.target, &md.name)?;
                    }
                    if let Some(v) = self.views.get_mut(&md.target) {
                        v.name = md.name.clone();
                        v.body = md.body.clone();
                    }
                } else {
                    return Err(Self::not_found("procedure or view", md.target));
                }
                Ok(md.target)
            }
            Modification::Edit(e) => self.edit_domain(pos, e, ctx),
        }
    }

    /// Replaces a domain and moves every column declared over it to the new
    /// type. Stored values and defaults must fit the new type.
    fn edit_domain(&mut self, pos: Position, e: &Edit, ctx: &InstallContext) -> InstallResult<Position> {
        let current = self
            .domains
            .get(&e.target)
            .ok_or_else(|| Self::not_found("domain", e.target))?;
        let renamed = current.name != e.domain.name;
        self.require(ctx, e.target, Privilege::OWNER)?;
        if !e.domain.data_type.admits(&e.domain.default) {
            return Err(InstallError::TypeMismatch {
                column: e.target,
                value: e.domain.default.to_string(),
            });
        }

        let mut retyped = Vec::new();
        for column in self.columns.values().filter(|c| c.domain == Some(e.target)) {
            let mut next = column.clone();
            next.data_type = e.domain.data_type;
            next.version = pos;
            if !next.data_type.admits(&next.default) {
                return Err(InstallError::TypeMismatch {
                    column: next.pos,
                    value: next.default.to_string(),
                });
            }
            for row in self.rows_of(next.table) {
                if let Some(value) = row.fields.get(&next.pos) {
                    self.validate_value(&next, value)?;
                }
            }
            retyped.push(next);
        }

        if renamed {
            self.rebind(e.target, &e.domain.name)?;
        }
        for column in retyped {
            self.columns.insert(column.pos, column);
        }
        self.domains.insert(
            e.target,
            Domain {
                pos: e.target,
                name: e.domain.name.clone(),
                data_type: e.domain.data_type,
                default: e.domain.default.clone(),
            },
        );
        Ok(e.target)
    }

    fn rename(&mut self, target: Position, name: &str) -> InstallResult<()> {
        match self.kind_of(target) {
            Some(ObjectKind::Table) => {
                self.rebind(target, name)?;
                if let Some(t) = self.tables.get_mut(&target) {
                    t.name = name.to_string();
                }
            }
            Some(ObjectKind::Domain) => {
                self.rebind(target, name)?;
                if let Some(d) = self.domains.get_mut(&target) {
                    d.name = name.to_string();
                }
            }
            Some(ObjectKind::View) => {
                self.rebind(target, name)?;
                if let Some(v) = self.views.get_mut(&target) {
                    v.name = name.to_string();
                }
            }
            Some(ObjectKind::Procedure) => {
                if let Some(p) = self.procedures.get(&target) {
                    if p.owner_type.is_none() {
                        let key = procedure_key(name, p.arity);
                        self.rebind(target, &key)?;
                    }
                }
                if let Some(p) = self.procedures.get_mut(&target) {
                    p.name = name.to_string();
                }
            }
            Some(ObjectKind::Column) => {
                let table = self.columns.get(&target).map(|c| c.table).unwrap_or_default();
                if let Some(other) = self.column_named(table, name) {
                    if other != target {
                        return Err(InstallError::DuplicateName {
                            name: name.to_string(),
                            scope: table,
                        });
                    }
                }
                if let Some(c) = self.columns.get_mut(&target) {
                    c.name = name.to_string();
                }
            }
            Some(ObjectKind::Index) => {
                if let Some(i) = self.indexes.get_mut(&target) {
                    i.name = name.to_string();
                }
            }
            Some(ObjectKind::Trigger) => {
                if let Some(t) = self.triggers.get_mut(&target) {
                    t.name = name.to_string();
                }
            }
            Some(ObjectKind::Check) => {
                if let Some(c) = self.checks.get_mut(&target) {
                    c.name = name.to_string();
                }
            }
            Some(ObjectKind::Role) => {
                if self.role_names.get(name).is_some_and(|p| *p != target) {
                    return Err(InstallError::DuplicateName {
                        name: name.to_string(),
                        scope: Position::NONE,
                    });
                }
                self.role_names.retain(|_, p| *p != target);
                self.role_names.insert(name.to_string(), target);
                if let Some(r) = self.roles.get_mut(&target) {
                    r.name = name.to_string();
                }
            }
            Some(ObjectKind::User) => {
                if self.user_names.get(name).is_some_and(|p| *p != target) {
                    return Err(InstallError::DuplicateName {
                        name: name.to_string(),
                        scope: Position::NONE,
                    });
                }
                self.user_names.retain(|_, p| *p != target);
                self.user_names.insert(name.to_string(), target);
                if let Some(u) = self.users.get_mut(&target) {
                    u.name = name.to_string();
                }
            }
            Some(ObjectKind::Row) => {
                return Err(InstallError::Invalid(format!("row {} has no name", target)))
            }
            None => return Err(Self::not_found("object", target)),
        }
        Ok(())
    }

    // ==================
    // Data changes
    // ==================

    fn install_data(
        &mut self,
        pos: Position,
        d: &DataChange,
        ctx: &InstallContext,
    ) -> InstallResult<Position> {
        match d {
            DataChange::Insert(i) => self.insert_row(pos, i, ctx),
            DataChange::Update(u) => {
                self.require(ctx, u.table, Privilege::UPDATE)?;
                self.expect_row_in(u.row, u.table)?;
                self.change_row(u.row, &u.fields, pos)?;
                Ok(u.row)
            }
            DataChange::Delete(del) => {
                self.require(ctx, del.table, Privilege::DELETE)?;
                self.expect_row_in(del.row, del.table)?;
                self.remove_row(del.row, pos)?;
                Ok(del.row)
            }
        }
    }

    fn expect_row_in(&self, row: Position, table: Position) -> InstallResult<()> {
        match self.rows.get(&row) {
            Some(r) if r.tables.contains(&table) => Ok(()),
            _ => Err(Self::not_found("row", row)),
        }
    }

    fn table_columns(&self, tables: &[Position]) -> Vec<Position> {
        tables
            .iter()
            .filter_map(|t| self.tables.get(t))
            .flat_map(|t| t.columns.iter().copied())
            .collect()
    }

    fn insert_row(&mut self, pos: Position, i: &Insert, ctx: &InstallContext) -> InstallResult<Position> {
        let mut tables = vec![i.table];
        tables.extend(i.extra_tables.iter().copied());
        for t in &tables {
            if !self.tables.contains_key(t) {
                return Err(Self::not_found("table", *t));
            }
            self.require(ctx, *t, Privilege::INSERT)?;
        }

        let columns = self.table_columns(&tables);
        if let Some(stray) = i.fields.keys().find(|c| !columns.contains(c)) {
            return Err(InstallError::Invalid(format!(
                "column {} is not part of table {}",
                stray, i.table
            )));
        }
        let mut fields = Fields::new();
        for col in &columns {
            let column = self
                .columns
                .get(col)
                .ok_or_else(|| Self::not_found("column", *col))?;
            let value = i
                .fields
                .get(col)
                .cloned()
                .unwrap_or_else(|| column.default.clone());
            self.validate_value(column, &value)?;
            fields.insert(*col, value);
        }

        let row = Row {
            pos,
            tables,
            fields,
            version: pos,
        };
        self.check_row_keys(&row, None)?;
        self.index_row(&row);
        for t in &row.tables {
            if let Some(table) = self.tables.get_mut(t) {
                table.rows.insert(pos);
            }
        }
        self.rows.insert(pos, row);
        Ok(pos)
    }

    /// Checks every index of the row's tables whose key the row changes.
    fn check_row_keys(&self, row: &Row, old: Option<&Row>) -> InstallResult<()> {
        for t in &row.tables {
            for index in self.indexes_of(*t) {
                let key = self.key_of(index, &row.fields);
                if let Some(old) = old {
                    if self.key_of(index, &old.fields) == key {
                        continue;
                    }
                }
                self.check_key(index, &key, row, &index.keys)?;
            }
        }
        Ok(())
    }

    fn row_index_keys(&self, row: &Row) -> Vec<(Position, Key)> {
        row.tables
            .iter()
            .flat_map(|t| self.indexes_of(*t))
            .map(|index| (index.pos, self.key_of(index, &row.fields)))
            .collect()
    }

    pub(super) fn index_row(&mut self, row: &Row) {
        for (index, key) in self.row_index_keys(row) {
            if let Some(index) = self.indexes.get_mut(&index) {
                index.keys.entry(key).or_default().insert(row.pos);
            }
        }
    }

    pub(super) fn unindex_row(&mut self, row: &Row) {
        for (index, key) in self.row_index_keys(row) {
            if let Some(index) = self.indexes.get_mut(&index) {
                if let Some(rows) = index.keys.get_mut(&key) {
                    rows.remove(&row.pos);
                    if rows.is_empty() {
                        index.keys.remove(&key);
                    }
                }
            }
        }
    }

    /// Unique indexes of the row's tables paired with the foreign keys that reference them.
    fn referencing_pairs(&self, row: &Row) -> Vec<(Position, Position)> {
        row.tables
            .iter()
            .flat_map(|t| self.indexes_of(*t))
            .filter(|i| i.flags.is_unique())
            .flat_map(|i| i.referenced_by.iter().map(move |fk| (i.pos, *fk)))
            .collect()
    }

    /// Field changes that apply a referential action to a foreign key's columns.
    fn referential_changes(
        &self,
        fk: &Index,
        action: ReferentialAction,
        new_key: Option<&Key>,
    ) -> Fields {
        fk.columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = match action {
                    ReferentialAction::Cascade => new_key
                        .and_then(|k| k.get(i).cloned())
                        .unwrap_or(Value::Null),
                    ReferentialAction::SetDefault => self
                        .columns
                        .get(col)
                        .map(|c| c.default.clone())
                        .unwrap_or(Value::Null),
                    ReferentialAction::SetNull | ReferentialAction::Restrict => Value::Null,
                };
                (*col, value)
            })
            .collect()
    }

    /// Applies `changes` to a row, maintaining indexes and referential actions.
    pub(super) fn change_row(
        &mut self,
        row_pos: Position,
        changes: &Fields,
        version: Position,
    ) -> InstallResult<()> {
        let old = self
            .rows
            .get(&row_pos)
            .cloned()
            .ok_or_else(|| Self::not_found("row", row_pos))?;
        let columns = self.table_columns(&old.tables);
        let mut new = old.clone();
        for (col, value) in changes {
            if !columns.contains(col) {
                return Err(InstallError::Invalid(format!(
                    "column {} is not part of row {}",
                    col, row_pos
                )));
            }
            let column = self
                .columns
                .get(col)
                .ok_or_else(|| Self::not_found("column", *col))?;
            self.validate_value(column, value)?;
            new.fields.insert(*col, value.clone());
        }
        new.version = version;
        self.check_row_keys(&new, Some(&old))?;

        self.unindex_row(&old);
        self.index_row(&new);
        self.rows.insert(row_pos, new.clone());

        for (index_pos, fk_pos) in self.referencing_pairs(&old) {
            let (Some(index), Some(fk)) = (self.indexes.get(&index_pos), self.indexes.get(&fk_pos)) else {
                continue;
            };
            let old_key = self.key_of(index, &old.fields);
            let new_key = self.key_of(index, &new.fields);
            if old_key == new_key || has_null(&old_key) {
                continue;
            }
            let referencing: Vec<Position> = fk.rows_with(&old_key).filter(|r| *r != row_pos).collect();
            let Some(first) = referencing.first().copied() else {
                continue;
            };
            let action = fk.flags.on_update();
            if action == ReferentialAction::Restrict {
                return Err(InstallError::StillReferenced {
                    index: fk_pos,
                    row: first,
                });
            }
            let fk_changes = self.referential_changes(fk, action, Some(&new_key));
            for r in referencing {
                self.change_row(r, &fk_changes, version)?;
            }
        }
        Ok(())
    }

    /// Removes a row, applying delete actions of foreign keys that reference it.
    pub(super) fn remove_row(&mut self, row_pos: Position, version: Position) -> InstallResult<()> {
        let Some(old) = self.rows.get(&row_pos).cloned() else {
            return Ok(());
        };
        self.unindex_row(&old);
        self.rows.remove(&row_pos);
        for t in &old.tables {
            if let Some(table) = self.tables.get_mut(t) {
                table.rows.remove(&row_pos);
            }
        }

        for (index_pos, fk_pos) in self.referencing_pairs(&old) {
            let (Some(index), Some(fk)) = (self.indexes.get(&index_pos), self.indexes.get(&fk_pos)) else {
                continue;
            };
            let key = self.key_of(index, &old.fields);
            if has_null(&key) {
                continue;
            }
            let referencing: Vec<Position> = fk.rows_with(&key).collect();
            let Some(first) = referencing.first().copied() else {
                continue;
            };
            match fk.flags.on_delete() {
                ReferentialAction::Restrict => {
                    return Err(InstallError::StillReferenced {
                        index: fk_pos,
                        row: first,
                    })
                }
                ReferentialAction::Cascade => {
                    for r in referencing {
                        self.remove_row(r, version)?;
                    }
                }
                action => {
                    let changes = self.referential_changes(fk, action, None);
                    for r in referencing {
                        self.change_row(r, &changes, version)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ==================
    // Control
    // ==================

    fn install_control(
        &mut self,
        pos: Position,
        c: &Control,
        ctx: &mut InstallContext,
    ) -> InstallResult<Position> {
        match c {
            Control::Transaction(m) => {
                if !self.roles.contains_key(&m.role) {
                    return Err(Self::not_found("role", m.role));
                }
                if !self.users.contains_key(&m.user) {
                    return Err(Self::not_found("user", m.user));
                }
                *ctx = InstallContext {
                    role: m.role,
                    user: m.user,
                    marker: pos,
                };
                Ok(pos)
            }
            Control::TriggeredAction(t) => {
                let trigger = self
                    .triggers
                    .get(&t.trigger)
                    .ok_or_else(|| Self::not_found("trigger", t.trigger))?;
                ctx.role = trigger.definer;
                Ok(t.trigger)
            }
            Control::EndOfFile(_) => Ok(pos),
        }
    }
}
