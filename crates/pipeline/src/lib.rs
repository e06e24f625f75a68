//! Cross-partition execution contexts, pipeline stages, and continuation
//! tokens for CPQ.
//!
//! Architecture role:
//! - fans a compiled query out to per-partition producers and merges their
//!   streams (plain parallel or global ORDER BY);
//! - post-processes the merged stream through composable stages (DISTINCT,
//!   aggregation, GROUP BY, OFFSET/LIMIT, TOP);
//! - keeps the whole pipeline resumable through nested continuation tokens;
//! - wraps the pipeline in the catch-all and stale-metadata retry policies.
//!
//! Key modules:
//! - [`executor`]: consumed transport/routing interfaces
//! - [`producer`], [`parallel`], [`order_by`]: the cross-partition engines
//! - [`stages`]: the decorator stages
//! - [`token`]: the wire token codec
//! - [`wrappers`]: top-level failure/retry policy
//!
//! Everything composes through [`PipelineComponent`]: one polymorphic
//! drain/is-done/token capability set, wrapped explicitly rather than
//! inherited.

pub mod executor;
pub mod item;
pub mod order_by;
pub mod page;
pub mod parallel;
pub mod producer;
pub mod range;
pub mod stages;
pub mod testing;
pub mod token;
pub mod wrappers;

use futures::future::BoxFuture;

use cpq_common::{CancellationToken, Result};

pub use executor::{FetchOutcome, FetchedPage, PartitionRequestExecutor, RoutingCacheRefresher};
pub use item::{OrderByItem, ResultItem};
pub use order_by::OrderByContext;
pub use page::{QueryFailure, QueryPage};
pub use parallel::ParallelContext;
pub use producer::{PartitionProducer, ProducerEvent};
pub use range::PartitionRange;

/// The single capability set every execution context and pipeline stage
/// implements. Composition is explicit wrapping: a stage owns a boxed source
/// component and is itself a component.
///
/// Contract:
/// - `drain` is call-and-await; overlapping calls to the same component are
///   not supported;
/// - ordinary query failures come back as failed pages, never `Err`;
/// - `Err` is reserved for cancellation and internal faults (converted to a
///   terminal failed page by the catch-all wrapper);
/// - `continuation_token` returns `Ok(None)` once the component is done.
pub trait PipelineComponent: Send {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>>;

    fn is_done(&self) -> bool;

    fn continuation_token(&self) -> Result<Option<String>>;
}

/// Boxed component, the unit of pipeline composition.
pub type BoxedComponent = Box<dyn PipelineComponent>;
