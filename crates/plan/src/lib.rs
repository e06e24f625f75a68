//! Compiled query plan surface and feature negotiation for CPQ.
//!
//! Architecture role:
//! - exposes the engine-visible slice of a service-compiled query plan
//!   ([`QueryInfo`]): aggregate shape, ORDER BY, DISTINCT, GROUP BY, TOP,
//!   OFFSET/LIMIT
//! - models caller capabilities as a [`QueryFeatures`] bitset
//! - negotiates required-minus-supported, producing one combined error that
//!   enumerates every missing feature
//!
//! Key modules:
//! - [`plan`]
//! - [`features`]
//! - [`negotiate`]

pub mod features;
pub mod negotiate;
pub mod plan;

pub use features::QueryFeatures;
pub use negotiate::{check_supported, needed_features};
pub use plan::{AggregateOperator, DistinctQueryType, QueryInfo, SortDirection, SortOrder};
