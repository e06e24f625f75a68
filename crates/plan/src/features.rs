use std::fmt;

use serde::{Deserialize, Serialize};

/// Bitset of query capabilities negotiated between a compiled plan and a caller.
///
/// A plan declares *required* features; a caller declares *supported* features;
/// negotiation computes required-minus-supported. See [`crate::needed_features`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QueryFeatures(u32);

impl QueryFeatures {
    pub const NONE: QueryFeatures = QueryFeatures(0);
    /// Single value-selecting aggregate without grouping.
    pub const AGGREGATE: QueryFeatures = QueryFeatures(1 << 0);
    /// Aggregate whose result is not a bare SELECT VALUE.
    pub const NON_VALUE_AGGREGATE: QueryFeatures = QueryFeatures(1 << 1);
    /// More than one aggregate operator in a single query.
    pub const MULTIPLE_AGGREGATES: QueryFeatures = QueryFeatures(1 << 2);
    pub const DISTINCT: QueryFeatures = QueryFeatures(1 << 3);
    pub const GROUP_BY: QueryFeatures = QueryFeatures(1 << 4);
    pub const OFFSET_AND_LIMIT: QueryFeatures = QueryFeatures(1 << 5);
    /// Single-expression ORDER BY.
    pub const ORDER_BY: QueryFeatures = QueryFeatures(1 << 6);
    /// Multi-expression ORDER BY; strictly stronger than [`Self::ORDER_BY`].
    pub const MULTIPLE_ORDER_BY: QueryFeatures = QueryFeatures(1 << 7);
    pub const TOP: QueryFeatures = QueryFeatures(1 << 8);
    /// Every feature the engine implements; the default caller capability set.
    pub const ALL: QueryFeatures = QueryFeatures((1 << 9) - 1);

    const ALL_FLAGS: [(QueryFeatures, &'static str); 9] = [
        (Self::AGGREGATE, "Aggregate"),
        (Self::NON_VALUE_AGGREGATE, "NonValueAggregate"),
        (Self::MULTIPLE_AGGREGATES, "MultipleAggregates"),
        (Self::DISTINCT, "Distinct"),
        (Self::GROUP_BY, "GroupBy"),
        (Self::OFFSET_AND_LIMIT, "OffsetAndLimit"),
        (Self::ORDER_BY, "OrderBy"),
        (Self::MULTIPLE_ORDER_BY, "MultipleOrderBy"),
        (Self::TOP, "Top"),
    ];

    pub const fn union(self, other: QueryFeatures) -> QueryFeatures {
        QueryFeatures(self.0 | other.0)
    }

    /// Set difference: flags in `self` absent from `other`.
    pub const fn minus(self, other: QueryFeatures) -> QueryFeatures {
        QueryFeatures(self.0 & !other.0)
    }

    pub const fn contains(self, flag: QueryFeatures) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of every set flag, in declaration order.
    pub fn flag_names(self) -> Vec<&'static str> {
        Self::ALL_FLAGS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for QueryFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        write!(f, "{}", self.flag_names().join(", "))
    }
}
