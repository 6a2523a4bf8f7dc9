//! # Install Errors
//!
//! Errors raised while applying a physical to the catalog. Each carries a
//! SQLSTATE-style code so callers can tell constraint violations from schema
//! mistakes.

use thiserror::Error;

use crate::errors::Severity;
use crate::physical::Privilege;
use crate::position::Position;

/// Result type for install operations
pub type InstallResult<T> = Result<T, InstallError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    // ==================
    // Schema Errors
    // ==================

    /// Referenced object does not exist in the catalog
    #[error("{kind} {pos} not found")]
    NotFound { kind: &'static str, pos: Position },

    /// Name already bound in the scope
    #[error("name '{name}' already defined in scope {scope}")]
    DuplicateName { name: String, scope: Position },

    /// Definition is well-formed bytes but meaningless here
    #[error("invalid definition: {0}")]
    Invalid(String),

    /// Acting role and user lack the privilege
    #[error("privilege {privilege} required on {object}")]
    AccessDenied { object: Position, privilege: Privilege },

    /// Drop with restrict found a dependent
    #[error("cannot drop {target}: {dependent} depends on it")]
    Restricted { target: Position, dependent: Position },

    // ==================
    // Constraint Errors
    // ==================

    /// Key already present in a primary or unique index
    #[error("duplicate key {key} in index {index}: row {existing} already holds it")]
    DuplicateKey {
        index: Position,
        existing: Position,
        key: String,
    },

    /// Foreign key has no matching referenced key
    #[error("foreign key {key} of index {index} has no referenced row")]
    MissingReference { index: Position, key: String },

    /// Referenced row is still in use by a restrict foreign key
    #[error("row {row} is still referenced through index {index}")]
    StillReferenced { index: Position, row: Position },

    /// Not-null column would hold null
    #[error("column {column} may not be null")]
    NullValue { column: Position },

    /// Value does not fit the column type
    #[error("value {value} does not fit column {column}")]
    TypeMismatch { column: Position, value: String },
}

impl InstallError {
    /// SQLSTATE-style code
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::NotFound { .. } => "42107",
            InstallError::DuplicateName { .. } => "42104",
            InstallError::Invalid(_) => "42000",
            InstallError::AccessDenied { .. } => "42105",
            InstallError::Restricted { .. } => "2BP01",
            InstallError::DuplicateKey { .. } => "23000",
            InstallError::MissingReference { .. } => "23000",
            InstallError::StillReferenced { .. } => "23000",
            InstallError::NullValue { .. } => "23000",
            InstallError::TypeMismatch { .. } => "22005",
        }
    }

    /// Integrity constraint violations, as opposed to schema errors
    pub fn is_constraint(&self) -> bool {
        self.code() == "23000"
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}
