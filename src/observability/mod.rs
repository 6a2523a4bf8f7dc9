//! Observability: structured logging and counters
//!
//! # Principles
//!
//! 1. Observability is read-only and never changes a commit's outcome
//! 2. No background threads
//! 3. Deterministic line format
//!
//! ```ignore
//! use physlog::observability::{Event, Level, Logger, MetricsRegistry};
//!
//! let logger = Logger::stdout(Level::Info);
//! logger.info(Event::CommitComplete, &[("marker", "32")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_commits();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Level, Logger};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
