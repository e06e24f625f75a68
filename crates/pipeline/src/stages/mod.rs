//! Composable result-pipeline stages.
//!
//! Each stage wraps a boxed source component implementing
//! [`crate::PipelineComponent`] and is itself such a component. Stages own
//! their slice of the continuation token: construction peels the stage's
//! fragment and hands the wrapped source fragment to a factory closure, so
//! the nesting order on the wire always matches the composition order.
//!
//! Construction from a non-null, unparsable token fails with a
//! malformed-token error naming the stage; stages never silently substitute
//! default state.

pub mod aggregate;
pub mod distinct;
pub mod group_by;
pub mod offset_limit;

pub use aggregate::AggregateComponent;
pub use distinct::DistinctComponent;
pub use group_by::GroupByComponent;
pub use offset_limit::{LimitComponent, OffsetComponent};

use cpq_common::Result;

use crate::BoxedComponent;

/// Builds the wrapped source component from its peeled token fragment.
///
/// Stages receive this as a closure instead of a ready component so that a
/// malformed stage token fails before any source work happens.
pub type SourceFactory<'a> = Box<dyn FnOnce(Option<String>) -> Result<BoxedComponent> + 'a>;
