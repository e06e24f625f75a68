//! Shared configuration, error types, ids, and cancellation primitives for CPQ crates.
//!
//! Architecture role:
//! - defines per-query execution configuration passed across layers
//! - provides the common [`QueryError`] / [`Result`] contracts
//! - hosts the status/sub-status constants the engine reacts to
//! - provides the cooperative [`CancellationToken`]
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`status`]
//! - [`cancel`]
//! - [`ids`]

pub mod cancel;
pub mod config;
pub mod error;
pub mod ids;
pub mod status;

pub use cancel::CancellationToken;
pub use config::QueryExecutionConfig;
pub use error::{QueryError, Result};
pub use ids::{ActivityId, RangeId};
pub use status::{status_code, sub_status_code};
