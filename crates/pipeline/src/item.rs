//! Result items and the document-store value comparator.
//!
//! Items are opaque to the engine except for two externally computed keys:
//! the unique row id (`rid`) and the ORDER BY sort keys the transport layer
//! attaches per the plan's rewritten query. The comparator below defines the
//! total order the order-by merge and the MIN/MAX aggregators rely on:
//! undefined < null < false < true < number < string, then non-scalar types
//! by rank. Within numbers, f64 ordering; within strings, lexicographic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cpq_plan::{SortDirection, SortOrder};

/// One ORDER BY key slot. `None` models an undefined key (the expression did
/// not evaluate on the document), which sorts before every defined value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderByItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
}

impl OrderByItem {
    pub fn defined(value: Value) -> Self {
        Self { item: Some(value) }
    }

    pub fn undefined() -> Self {
        Self { item: None }
    }
}

/// One deserialized query result row plus its engine-visible keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// The document/projection payload, never inspected by the engine.
    pub payload: Value,
    /// Backend-unique row id, used for order-by tie-breaking and resumption.
    pub rid: String,
    /// Sort keys, one per ORDER BY expression; empty for unsorted queries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by_items: Vec<OrderByItem>,
}

impl ResultItem {
    pub fn new(payload: Value, rid: impl Into<String>) -> Self {
        Self {
            payload,
            rid: rid.into(),
            order_by_items: Vec::new(),
        }
    }

    pub fn with_order_by_items(mut self, items: Vec<OrderByItem>) -> Self {
        self.order_by_items = items;
        self
    }
}

/// Type rank in the document-store total order.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Whether a value participates in scalar comparisons (MIN/MAX inputs).
pub fn is_comparable_scalar(value: &Value) -> bool {
    type_rank(Some(value)) <= 4
}

/// Total order over optional values under document-store semantics.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        // Same-rank non-scalars (and null/null, undefined/undefined) tie; the
        // rid tie-break keeps the merge total.
        _ => Ordering::Equal,
    }
}

/// Compares two sort-key tuples under the query's sort orders, without the
/// rid tie-break. Slots missing from either tuple compare as undefined.
pub fn compare_order_by_items(
    a: &[OrderByItem],
    b: &[OrderByItem],
    sort_orders: &[SortOrder],
) -> Ordering {
    for (index, order) in sort_orders.iter().enumerate() {
        let left = a.get(index).and_then(|i| i.item.as_ref());
        let right = b.get(index).and_then(|i| i.item.as_ref());
        let mut ordering = compare_values(left, right);
        if order.direction == SortDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Full merge comparator: sort-key tuples, then rid ascending.
pub fn compare_items(a: &ResultItem, b: &ResultItem, sort_orders: &[SortOrder]) -> Ordering {
    compare_order_by_items(&a.order_by_items, &b.order_by_items, sort_orders)
        .then_with(|| a.rid.cmp(&b.rid))
}
