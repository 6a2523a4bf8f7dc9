//! Database and connection errors
//!
//! Wraps every subsystem error a commit or open can surface, so callers can
//! match on the failing layer and still read its code.

use thiserror::Error;

use crate::catalog::InstallError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::conflict::ConflictError;
use crate::errors::Severity;
use crate::log::LogError;
use crate::position::{Position, PositionError};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Concurrent commit invalidated the transaction; retry from a new snapshot
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("install failed: {0}")]
    Install(#[from] InstallError),

    #[error("malformed write-set: {0}")]
    Position(#[from] PositionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("role {0} does not exist")]
    UnknownRole(Position),

    #[error("user {0} does not exist")]
    UnknownUser(Position),

    /// A thread panicked while holding the commit lock
    #[error("commit lock poisoned")]
    Poisoned,

    #[error("database is closed")]
    Closed,
}

impl DatabaseError {
    pub fn code(&self) -> &'static str {
        match self {
            DatabaseError::Conflict(e) => e.code().code(),
            DatabaseError::Install(e) => e.code(),
            DatabaseError::Position(e) => e.code(),
            DatabaseError::Codec(e) => e.code().code(),
            DatabaseError::Log(e) => e.code().code(),
            DatabaseError::Config(e) => e.code(),
            DatabaseError::UnknownRole(_) | DatabaseError::UnknownUser(_) => "42107",
            DatabaseError::Poisoned => "PHYSLOG_DATABASE_POISONED",
            DatabaseError::Closed => "PHYSLOG_DATABASE_CLOSED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DatabaseError::Conflict(e) => e.severity(),
            DatabaseError::Install(e) => e.severity(),
            DatabaseError::Position(e) => e.severity(),
            DatabaseError::Codec(e) => e.severity(),
            DatabaseError::Log(e) => e.severity(),
            DatabaseError::Poisoned => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// True when retrying the transaction from a fresh snapshot may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The guard stayed held for every retry
    #[error("connection busy: {guard} guard still held after {attempts} attempts")]
    Busy { guard: &'static str, attempts: u32 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
