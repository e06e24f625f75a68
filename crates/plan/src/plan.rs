use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregate operators the pipeline can evaluate client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOperator {
    Average,
    Count,
    Max,
    Min,
    Sum,
}

/// Per-expression sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ORDER BY expression as compiled by the service: the expression text is
/// opaque here; the transport attaches the computed sort key to each item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    pub expression: String,
    pub direction: SortDirection,
}

/// Which DISTINCT de-duplication variant the plan calls for.
///
/// `Ordered` is only valid when the source stream is globally sorted (so
/// duplicates are adjacent); the plan compiler, not this engine, guarantees
/// that pairing. A mismatched selection silently filters incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctQueryType {
    #[default]
    None,
    Unordered,
    Ordered,
}

/// Compiled query plan surface consumed by the execution engine.
///
/// This is the engine-visible slice of the service's query plan: feature
/// shape, stage parameters, and the rewritten per-partition query text. The
/// engine never parses SQL; it only reads these fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryInfo {
    /// Top-level aggregate operators, in select-list order.
    #[serde(default)]
    pub aggregates: Vec<AggregateOperator>,
    /// Whether the select list is a bare `SELECT VALUE` projection.
    #[serde(default)]
    pub has_select_value: bool,
    /// ORDER BY expressions with directions; empty when the query is unsorted.
    #[serde(default)]
    pub order_by: Vec<SortOrder>,
    #[serde(default)]
    pub distinct_type: DistinctQueryType,
    /// GROUP BY key expressions; empty when the query has no grouping.
    #[serde(default)]
    pub group_by_expressions: Vec<String>,
    /// Select-list alias -> aggregate operator for grouped queries; `None`
    /// values are plain key projections.
    #[serde(default)]
    pub group_by_alias_to_aggregate: BTreeMap<String, Option<AggregateOperator>>,
    #[serde(default)]
    pub top: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Per-partition rewritten query text forwarded to the executor.
    #[serde(default)]
    pub rewritten_query: String,
}

impl QueryInfo {
    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
            || self
                .group_by_alias_to_aggregate
                .values()
                .any(|op| op.is_some())
    }

    pub fn has_distinct(&self) -> bool {
        self.distinct_type != DistinctQueryType::None
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by_expressions.is_empty() || !self.group_by_alias_to_aggregate.is_empty()
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Count of aggregate operators across top-level and grouped projections.
    pub fn aggregate_count(&self) -> usize {
        if !self.aggregates.is_empty() {
            self.aggregates.len()
        } else {
            self.group_by_alias_to_aggregate
                .values()
                .filter(|op| op.is_some())
                .count()
        }
    }
}
