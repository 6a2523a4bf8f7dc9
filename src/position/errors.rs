//! Position errors
//!
//! All of these are structural: they mean the dependency resolver was bypassed
//! or the pending set was malformed. None are user-recoverable.

use thiserror::Error;

use super::Position;
use crate::errors::Severity;

/// Result type for position and fix-up operations
pub type PositionResult<T> = Result<T, PositionError>;

/// Structural failures while turning local positions into log offsets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// A local position reached serialization without a fix-up entry
    #[error("unresolved local reference {0}")]
    Unresolved(Position),

    /// A durable physical would reference something at or after itself
    #[error("physical {from} references {to}, which is not before it")]
    ForwardReference { from: Position, to: Position },

    /// A durable reference points past the end of the log
    #[error("reference {reference} lies beyond log end {end}")]
    BeyondLogEnd { reference: Position, end: Position },

    /// Pending physicals reference each other in a cycle
    #[error("dependency cycle through {0}")]
    Cycle(Position),
}

impl PositionError {
    pub fn code(&self) -> &'static str {
        match self {
            PositionError::Unresolved(_) => "PHYSLOG_POSITION_UNRESOLVED",
            PositionError::ForwardReference { .. } => "PHYSLOG_POSITION_FORWARD_REFERENCE",
            PositionError::BeyondLogEnd { .. } => "PHYSLOG_POSITION_BEYOND_END",
            PositionError::Cycle(_) => "PHYSLOG_POSITION_CYCLE",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}
