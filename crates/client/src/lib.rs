//! Public surface of the cross-partition query engine.
//!
//! Responsibilities:
//! - assemble the stage pipeline for a compiled plan ([`factory`]);
//! - expose the drainable [`QueryCursor`] with its continuation-token and
//!   failure contract ([`cursor`]).
//!
//! Everything underneath (execution contexts, stages, tokens) lives in
//! `cpq-pipeline`; plan shapes and feature negotiation in `cpq-plan`.

pub mod cursor;
pub mod factory;

pub use cursor::QueryCursor;
pub use factory::build_pipeline;

pub use cpq_common::{CancellationToken, QueryError, QueryExecutionConfig, Result};
pub use cpq_pipeline::{PartitionRange, PartitionRequestExecutor, QueryPage, RoutingCacheRefresher};
pub use cpq_plan::{QueryFeatures, QueryInfo};
