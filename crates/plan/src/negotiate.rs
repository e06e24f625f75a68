//! Feature negotiation between a compiled plan and a caller's capability set.
//!
//! Pure functions: no IO, no state. The combined unsupported-features error
//! enumerates every missing feature so callers can decide in one round whether
//! to upgrade.

use cpq_common::{QueryError, Result};

use crate::features::QueryFeatures;
use crate::plan::QueryInfo;

/// Computes the features `plan` requires that `supported` does not cover.
pub fn needed_features(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    let mut needed = QueryFeatures::NONE;
    needed = needed.union(needed_for_aggregates(plan, supported));
    needed = needed.union(needed_for_distinct(plan, supported));
    needed = needed.union(needed_for_group_by(plan, supported));
    needed = needed.union(needed_for_offset_limit(plan, supported));
    needed = needed.union(needed_for_order_by(plan, supported));
    needed = needed.union(needed_for_top(plan, supported));
    needed
}

/// Accepts the plan or fails with one combined error naming every missing
/// feature.
pub fn check_supported(plan: &QueryInfo, supported: QueryFeatures) -> Result<()> {
    let missing = needed_features(plan, supported);
    if missing.is_empty() {
        return Ok(());
    }

    let names: Vec<&'static str> = missing.flag_names();
    let mut message = String::from(
        "Query contains 1 or more unsupported features. \
         Upgrade your SDK to a version that does support the requested features:",
    );
    for name in &names {
        message.push('\n');
        message.push_str("Query contained ");
        message.push_str(name);
        message.push_str(", which the calling client does not support.");
    }

    Err(QueryError::UnsupportedQueryFeatures {
        missing: names.iter().map(|n| n.to_string()).collect(),
        message,
    })
}

fn needed_for_aggregates(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    let mut needed = QueryFeatures::NONE;
    if !plan.has_aggregates() {
        return needed;
    }

    if plan.aggregate_count() == 1 {
        if plan.has_select_value {
            if !supported.contains(QueryFeatures::AGGREGATE) {
                needed = needed.union(QueryFeatures::AGGREGATE);
            }
        } else if !supported.contains(QueryFeatures::NON_VALUE_AGGREGATE) {
            needed = needed.union(QueryFeatures::NON_VALUE_AGGREGATE);
        }
    } else {
        if !supported.contains(QueryFeatures::NON_VALUE_AGGREGATE) {
            needed = needed.union(QueryFeatures::NON_VALUE_AGGREGATE);
        }
        if !supported.contains(QueryFeatures::MULTIPLE_AGGREGATES) {
            needed = needed.union(QueryFeatures::MULTIPLE_AGGREGATES);
        }
    }

    needed
}

fn needed_for_distinct(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    if plan.has_distinct() && !supported.contains(QueryFeatures::DISTINCT) {
        QueryFeatures::DISTINCT
    } else {
        QueryFeatures::NONE
    }
}

fn needed_for_group_by(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    if plan.has_group_by() && !supported.contains(QueryFeatures::GROUP_BY) {
        QueryFeatures::GROUP_BY
    } else {
        QueryFeatures::NONE
    }
}

fn needed_for_offset_limit(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    if (plan.offset.is_some() || plan.limit.is_some())
        && !supported.contains(QueryFeatures::OFFSET_AND_LIMIT)
    {
        QueryFeatures::OFFSET_AND_LIMIT
    } else {
        QueryFeatures::NONE
    }
}

fn needed_for_order_by(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    if !plan.has_order_by() {
        return QueryFeatures::NONE;
    }

    if plan.order_by.len() == 1 {
        if !supported.contains(QueryFeatures::ORDER_BY) {
            return QueryFeatures::ORDER_BY;
        }
    } else if !supported.contains(QueryFeatures::MULTIPLE_ORDER_BY) {
        return QueryFeatures::MULTIPLE_ORDER_BY;
    }

    QueryFeatures::NONE
}

fn needed_for_top(plan: &QueryInfo, supported: QueryFeatures) -> QueryFeatures {
    if plan.top.is_some() && !supported.contains(QueryFeatures::TOP) {
        QueryFeatures::TOP
    } else {
        QueryFeatures::NONE
    }
}
