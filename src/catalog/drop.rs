//! Dependency tracking and object removal

use std::collections::BTreeSet;

use super::errors::{InstallError, InstallResult};
use super::install::has_null;
use super::{Catalog, ObjectKind};
use crate::physical::{DropAction, Value};
use crate::position::Position;

impl Catalog {
    /// Positions that make up `target` and go away with it.
    pub(crate) fn parts(&self, target: Position) -> BTreeSet<Position> {
        let mut parts = BTreeSet::new();
        parts.insert(target);
        if let Some(t) = self.tables.get(&target) {
            parts.extend(t.columns.iter().copied());
            parts.extend(t.indexes.iter().copied());
            parts.extend(t.triggers.iter().copied());
            parts.extend(t.checks.iter().copied());
            parts.extend(
                self.checks
                    .values()
                    .filter(|c| t.columns.contains(&c.target))
                    .map(|c| c.pos),
            );
            parts.extend(
                self.procedures
                    .values()
                    .filter(|p| p.owner_type == Some(target))
                    .map(|p| p.pos),
            );
        }
        parts
    }

    /// Objects outside `target` that depend on it or on one of its parts.
    pub fn dependents(&self, target: Position) -> Vec<Position> {
        let parts = self.parts(target);
        let hit = |refs: &[Position]| refs.iter().any(|r| parts.contains(r));
        let mut deps = BTreeSet::new();

        for index in self.indexes.values() {
            if index.references.is_some_and(|r| parts.contains(&r)) || hit(&index.columns) {
                deps.insert(index.pos);
            }
        }
        for column in self.columns.values() {
            if column.domain.is_some_and(|d| parts.contains(&d)) {
                deps.insert(column.pos);
            }
        }
        for check in self.checks.values() {
            if parts.contains(&check.target) || hit(&check.body.refs) {
                deps.insert(check.pos);
            }
        }
        for trigger in self.triggers.values() {
            if parts.contains(&trigger.table) || hit(&trigger.body.refs) {
                deps.insert(trigger.pos);
            }
        }
        for procedure in self.procedures.values() {
            if procedure.owner_type.is_some_and(|o| parts.contains(&o)) || hit(&procedure.body.refs) {
                deps.insert(procedure.pos);
            }
        }
        for view in self.views.values() {
            if hit(&view.body.refs) {
                deps.insert(view.pos);
            }
        }

        deps.retain(|d| !parts.contains(d));
        deps.into_iter().collect()
    }

    /// Drops `target`, handling dependents according to `action`.
    pub(super) fn drop_object(&mut self, target: Position, action: DropAction) -> InstallResult<()> {
        match self.kind_of(target) {
            None => return Err(InstallError::NotFound { kind: "object", pos: target }),
            Some(ObjectKind::Row) => {
                return Err(InstallError::Invalid(format!(
                    "row {} is removed by delete, not drop",
                    target
                )))
            }
            Some(ObjectKind::Role) if target == Position::DEFAULT_ROLE => {
                return Err(InstallError::Invalid("the default role cannot be dropped".into()))
            }
            Some(ObjectKind::User) if target == Position::DEFAULT_USER => {
                return Err(InstallError::Invalid("the default user cannot be dropped".into()))
            }
            Some(_) => {}
        }

        for dep in self.dependents(target) {
            if !self.contains(dep) {
                continue;
            }
            match action {
                DropAction::Restrict => {
                    return Err(InstallError::Restricted {
                        target,
                        dependent: dep,
                    })
                }
                DropAction::Cascade => self.drop_object(dep, DropAction::Cascade)?,
                DropAction::SetNull | DropAction::SetDefault => {
                    if self.indexes.get(&dep).is_some_and(|i| i.flags.is_foreign()) {
                        self.reset_foreign_keys(dep, action)?;
                    }
                    self.drop_object(dep, DropAction::Cascade)?;
                }
            }
        }

        self.remove_object(target);
        Ok(())
    }

    /// Rewrites the key columns of every row referenced through a foreign key.
    fn reset_foreign_keys(&mut self, fk_pos: Position, action: DropAction) -> InstallResult<()> {
        let Some(fk) = self.indexes.get(&fk_pos).cloned() else {
            return Ok(());
        };
        let rows: Vec<Position> = fk
            .keys
            .iter()
            .filter(|(key, _)| !has_null(key))
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect();

        for r in rows {
            let Some(old) = self.rows.get(&r).cloned() else {
                continue;
            };
            let mut new = old.clone();
            for c in &fk.columns {
                let column = self
                    .columns
                    .get(c)
                    .ok_or(InstallError::NotFound { kind: "column", pos: *c })?;
                let value = match action {
                    DropAction::SetDefault => column.default.clone(),
                    _ => Value::Null,
                };
                self.validate_value(column, &value)?;
                new.fields.insert(*c, value);
            }
            self.unindex_row(&old);
            self.index_row(&new);
            self.rows.insert(r, new);
        }
        Ok(())
    }

    fn remove_index(&mut self, pos: Position) {
        let Some(index) = self.indexes.remove(&pos) else {
            return;
        };
        if let Some(t) = self.tables.get_mut(&index.table) {
            t.indexes.retain(|i| *i != pos);
        }
        if let Some(refs) = index.references {
            if let Some(target) = self.indexes.get_mut(&refs) {
                target.referenced_by.retain(|i| *i != pos);
            }
        }
    }

    fn forget(&mut self, pos: Position) {
        self.unbind(pos);
        for role in self.roles.values_mut() {
            role.privileges.remove(&pos);
        }
        for user in self.users.values_mut() {
            user.privileges.remove(&pos);
        }
    }

    /// Removes an object and its parts with no dependency checks.
    fn remove_object(&mut self, target: Position) {
        match self.kind_of(target) {
            Some(ObjectKind::Table) => {
                for part in self.parts(target) {
                    if part != target {
                        self.remove_object(part);
                    }
                }
                let rows: Vec<Position> = self
                    .tables
                    .get(&target)
                    .map(|t| t.rows.iter().copied().collect())
                    .unwrap_or_default();
                for r in rows {
                    if let Some(row) = self.rows.remove(&r) {
                        self.unindex_row(&row);
                        for t in &row.tables {
                            if let Some(table) = self.tables.get_mut(t) {
                                table.rows.remove(&r);
                            }
                        }
                    }
                }
                self.tables.remove(&target);
            }
            Some(ObjectKind::Column) => {
                if let Some(column) = self.columns.remove(&target) {
                    if let Some(t) = self.tables.get_mut(&column.table) {
                        t.columns.retain(|c| *c != target);
                    }
                    let rows: Vec<Position> = self
                        .tables
                        .get(&column.table)
                        .map(|t| t.rows.iter().copied().collect())
                        .unwrap_or_default();
                    for r in rows {
                        if let Some(row) = self.rows.get_mut(&r) {
                            row.fields.remove(&target);
                        }
                    }
                }
            }
            Some(ObjectKind::Index) => self.remove_index(target),
            Some(ObjectKind::Domain) => {
                self.domains.remove(&target);
            }
            Some(ObjectKind::Procedure) => {
                self.procedures.remove(&target);
            }
            Some(ObjectKind::View) => {
                self.views.remove(&target);
            }
            Some(ObjectKind::Trigger) => {
                if let Some(trigger) = self.triggers.remove(&target) {
                    if let Some(t) = self.tables.get_mut(&trigger.table) {
                        t.triggers.retain(|x| *x != target);
                    }
                }
            }
            Some(ObjectKind::Check) => {
                if let Some(check) = self.checks.remove(&target) {
                    if let Some(t) = self.tables.get_mut(&check.target) {
                        t.checks.retain(|x| *x != target);
                    }
                }
            }
            Some(ObjectKind::Role) => {
                self.roles.remove(&target);
                self.role_names.retain(|_, p| *p != target);
            }
            Some(ObjectKind::User) => {
                self.users.remove(&target);
                self.user_names.retain(|_, p| *p != target);
            }
            Some(ObjectKind::Row) | None => return,
        }
        self.forget(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InstallContext;
    use crate::physical::{
        Body, ColumnDef, DataType, DropObject, IndexDef, IndexFlags, Insert, Physical, Source,
        TableDef, ViewDef,
    };

    fn apply(catalog: &mut Catalog, pos: u64, body: impl Into<Body>) -> InstallResult<Position> {
        let mut ctx = InstallContext::default();
        catalog.install(&Physical::new(Position::new(pos), body), &mut ctx)
    }

    fn column(table: u64, name: &str) -> ColumnDef {
        ColumnDef {
            table: Position::new(table),
            name: name.into(),
            seq: 0,
            data_type: DataType::Integer,
            domain: None,
            default: Value::Null,
            not_null: false,
        }
    }

    /// P(id) with primary key, C(p) with a foreign key onto it, one row each
    fn parent_child() -> Catalog {
        let mut c = Catalog::new();
        apply(&mut c, 100, TableDef { name: "P".into() }).unwrap();
        apply(&mut c, 110, column(100, "id")).unwrap();
        apply(
            &mut c,
            120,
            IndexDef {
                name: "pk".into(),
                table: Position::new(100),
                columns: vec![Position::new(110)],
                flags: IndexFlags::PRIMARY_KEY,
                references: None,
            },
        )
        .unwrap();
        apply(&mut c, 200, TableDef { name: "C".into() }).unwrap();
        apply(&mut c, 210, column(200, "p")).unwrap();
        apply(
            &mut c,
            220,
            IndexDef {
                name: "fk".into(),
                table: Position::new(200),
                columns: vec![Position::new(210)],
                flags: IndexFlags::FOREIGN_KEY,
                references: Some(Position::new(120)),
            },
        )
        .unwrap();
        let one = |col: u64| [(Position::new(col), Value::Integer(1))].into_iter().collect();
        apply(
            &mut c,
            300,
            Insert {
                table: Position::new(100),
                extra_tables: vec![],
                fields: one(110),
            },
        )
        .unwrap();
        apply(
            &mut c,
            310,
            Insert {
                table: Position::new(200),
                extra_tables: vec![],
                fields: one(210),
            },
        )
        .unwrap();
        c
    }

    fn drop_with(catalog: &mut Catalog, pos: u64, target: u64, action: DropAction) -> InstallResult<Position> {
        apply(
            catalog,
            pos,
            DropObject {
                target: Position::new(target),
                action,
            },
        )
    }

    #[test]
    fn test_foreign_key_depends_on_referenced_table() {
        let c = parent_child();
        assert_eq!(c.dependents(Position::new(100)), vec![Position::new(220)]);
        assert!(c.dependents(Position::new(200)).is_empty());
    }

    #[test]
    fn test_drop_restrict_names_dependent() {
        let mut c = parent_child();
        let err = drop_with(&mut c, 400, 100, DropAction::Restrict).unwrap_err();
        assert_eq!(
            err,
            InstallError::Restricted {
                target: Position::new(100),
                dependent: Position::new(220)
            }
        );
        assert_eq!(err.code(), "2BP01");
    }

    #[test]
    fn test_drop_cascade_removes_dependents_and_rows() {
        let mut c = parent_child();
        drop_with(&mut c, 400, 100, DropAction::Cascade).unwrap();
        assert!(c.table(Position::new(100)).is_none());
        assert!(c.index(Position::new(220)).is_none());
        assert!(c.row(Position::new(300)).is_none());
        assert!(c.row(Position::new(310)).is_some());
        assert!(c.table(Position::new(200)).unwrap().indexes.is_empty());
        assert_eq!(c.lookup(Position::DEFAULT_ROLE, "P"), None);
    }

    #[test]
    fn test_drop_set_null_rewrites_referencing_rows() {
        let mut c = parent_child();
        drop_with(&mut c, 400, 100, DropAction::SetNull).unwrap();
        let child = c.row(Position::new(310)).unwrap();
        assert_eq!(child.fields.get(&Position::new(210)), Some(&Value::Null));
        assert!(c.index(Position::new(220)).is_none());
    }

    #[test]
    fn test_view_source_blocks_restrict_drop() {
        let mut c = parent_child();
        apply(
            &mut c,
            400,
            ViewDef {
                name: "v".into(),
                body: Source::new("select * from \"200\"", vec![Position::new(200)]),
            },
        )
        .unwrap();
        let err = drop_with(&mut c, 500, 200, DropAction::Restrict).unwrap_err();
        assert!(matches!(err, InstallError::Restricted { dependent, .. } if dependent == Position::new(400)));

        drop_with(&mut c, 510, 200, DropAction::Cascade).unwrap();
        assert!(c.view(Position::new(400)).is_none());
    }

    #[test]
    fn test_default_role_cannot_be_dropped() {
        let mut c = Catalog::new();
        let err = c.drop_object(Position::DEFAULT_ROLE, DropAction::Cascade).unwrap_err();
        assert_eq!(err.code(), "42000");
    }
}
