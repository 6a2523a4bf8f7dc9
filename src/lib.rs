//! physlog - append-only physical log with optimistic commit validation
//!
//! Every durable change to the database is a typed physical record appended
//! to a single log. A record's identity is its byte offset. Transactions
//! build their write-sets under local positions, are validated against
//! concurrent commits, and are written as one contiguous batch.

pub mod catalog;
pub mod codec;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod database;
pub mod errors;
pub mod log;
pub mod observability;
pub mod physical;
pub mod position;

pub use catalog::Catalog;
pub use commit::{CommitOutcome, Transaction};
pub use config::DatabaseConfig;
pub use database::{Connection, Database, DatabaseError, DatabaseResult};
pub use physical::{Body, Physical};
pub use position::Position;
