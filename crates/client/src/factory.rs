//! Pipeline assembly from a compiled query plan.
//!
//! Stage order is fixed: a cross-partition execution context at the bottom
//! (order-by-merging when the plan sorts, round-robin parallel otherwise),
//! then DISTINCT, then GROUP BY or plain aggregation, then OFFSET, LIMIT
//! and TOP. The caller's continuation token nests in the same order, so
//! assembly walks outermost-in: each stage decodes its own fragment and
//! hands the remainder to the factory closure for the stage beneath it.

use std::sync::Arc;

use tracing::debug;

use cpq_common::{QueryExecutionConfig, Result};
use cpq_plan::{check_supported, QueryFeatures, QueryInfo};
use cpq_pipeline::stages::{
    AggregateComponent, DistinctComponent, GroupByComponent, LimitComponent, OffsetComponent,
    SourceFactory,
};
use cpq_pipeline::{
    BoxedComponent, OrderByContext, ParallelContext, PartitionRange, PartitionRequestExecutor,
};

/// Builds the full stage pipeline for `plan` over `ranges`, resuming from
/// `continuation` when one is given.
///
/// Fails with an unsupported-features error naming every capability the
/// plan needs beyond `supported`, before any stage is constructed.
pub fn build_pipeline(
    plan: &QueryInfo,
    ranges: &[PartitionRange],
    executor: Arc<dyn PartitionRequestExecutor>,
    config: &QueryExecutionConfig,
    supported: QueryFeatures,
    continuation: Option<&str>,
) -> Result<BoxedComponent> {
    check_supported(plan, supported)?;
    debug!(
        ranges = ranges.len(),
        order_by = plan.has_order_by(),
        distinct = plan.has_distinct(),
        group_by = plan.has_group_by(),
        aggregates = plan.aggregate_count(),
        resuming = continuation.is_some(),
        "building query pipeline"
    );

    let context_ranges = ranges.to_vec();
    let context_config = config.clone();
    let sort_orders = plan.order_by.clone();
    let mut make: SourceFactory<'_> = Box::new(move |token| {
        if sort_orders.is_empty() {
            Ok(Box::new(ParallelContext::try_create(
                executor,
                context_ranges,
                context_config,
                token.as_deref(),
            )?) as BoxedComponent)
        } else {
            Ok(Box::new(OrderByContext::try_create(
                executor,
                context_ranges,
                sort_orders,
                context_config,
                token.as_deref(),
            )?) as BoxedComponent)
        }
    });

    if plan.has_distinct() {
        let inner = make;
        let distinct_type = plan.distinct_type;
        make = Box::new(move |token| {
            DistinctComponent::try_create(distinct_type, token.as_deref(), inner)
        });
    }

    if plan.has_group_by() {
        let inner = make;
        let aliases = plan.group_by_alias_to_aggregate.clone();
        make = Box::new(move |token| GroupByComponent::try_create(aliases, token.as_deref(), inner));
    } else if plan.has_aggregates() {
        let inner = make;
        let operators = plan.aggregates.clone();
        let single_value = plan.has_select_value;
        make = Box::new(move |token| {
            AggregateComponent::try_create(&operators, single_value, token.as_deref(), inner)
        });
    }

    if let Some(offset) = plan.offset {
        let inner = make;
        make = Box::new(move |token| OffsetComponent::try_create(offset, token.as_deref(), inner));
    }

    if let Some(limit) = plan.limit {
        let inner = make;
        make = Box::new(move |token| {
            LimitComponent::try_create_limit(limit, token.as_deref(), inner)
        });
    }

    if let Some(top) = plan.top {
        let inner = make;
        make =
            Box::new(move |token| LimitComponent::try_create_top(top, token.as_deref(), inner));
    }

    make(continuation.map(str::to_string))
}
