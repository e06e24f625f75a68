//! Client-side aggregation over per-partition partial results.
//!
//! Wire contract with the transport layer: for an aggregate query, every
//! source item's payload is a JSON array with one slot per aggregate
//! operator, each slot `{"item": <partial>}` for a defined partial or `{}`
//! for undefined (a partition with no qualifying rows). The accumulators
//! here combine those partials into the global result; the final drain
//! materializes a single synthetic item instead of passing raw items up.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use cpq_common::{CancellationToken, QueryError, Result};

use cpq_plan::AggregateOperator;

use crate::item::{compare_values, is_comparable_scalar, ResultItem};
use crate::page::QueryPage;
use crate::token::AggregateContinuationToken;
use crate::{BoxedComponent, PipelineComponent};

use super::SourceFactory;

/// Extracts the operator's partial from an aggregate payload slot. `None`
/// models undefined (missing slot, `{}`, or a payload that is not the
/// expected array shape).
fn partial_slot(payload: &Value, index: usize) -> Option<Value> {
    payload
        .as_array()?
        .get(index)?
        .as_object()?
        .get("item")
        .cloned()
}

/// One running accumulator, independently resumable through its own token
/// fragment.
#[derive(Debug)]
pub enum Aggregator {
    /// Partial counts are summed; tokenized as a non-negative 64-bit value.
    Count { count: i64 },
    /// `None` sum means the result poisoned to undefined (a partition
    /// reported a non-numeric or undefined partial).
    Sum { sum: Option<f64> },
    Min { value: Option<Value> },
    Max { value: Option<Value> },
    Average { sum: Option<f64>, count: u64 },
}

const COUNT_STAGE: &str = "count accumulator";
const SUM_STAGE: &str = "sum accumulator";
const MIN_MAX_STAGE: &str = "min/max accumulator";
const AVERAGE_STAGE: &str = "average accumulator";

const UNDEFINED_TOKEN: &str = "undefined";

impl Aggregator {
    pub fn try_create(operator: AggregateOperator, token: Option<&str>) -> Result<Self> {
        match operator {
            AggregateOperator::Count => {
                let count = match token {
                    None => 0,
                    Some(raw) => {
                        let parsed: i64 = raw.parse().map_err(|e| {
                            QueryError::malformed_token(
                                COUNT_STAGE,
                                format!("count token {raw:?}: {e}"),
                            )
                        })?;
                        if parsed < 0 {
                            return Err(QueryError::malformed_token(
                                COUNT_STAGE,
                                format!("count token {raw:?} is negative"),
                            ));
                        }
                        parsed
                    }
                };
                Ok(Aggregator::Count { count })
            }
            AggregateOperator::Sum => {
                let sum = match token {
                    None => Some(0.0),
                    Some(UNDEFINED_TOKEN) => None,
                    Some(raw) => Some(raw.parse::<f64>().map_err(|e| {
                        QueryError::malformed_token(SUM_STAGE, format!("sum token {raw:?}: {e}"))
                    })?),
                };
                Ok(Aggregator::Sum { sum })
            }
            AggregateOperator::Min | AggregateOperator::Max => {
                let value = match token {
                    None | Some(UNDEFINED_TOKEN) => None,
                    Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                        QueryError::malformed_token(
                            MIN_MAX_STAGE,
                            format!("min/max token {raw:?}: {e}"),
                        )
                    })?),
                };
                Ok(if operator == AggregateOperator::Min {
                    Aggregator::Min { value }
                } else {
                    Aggregator::Max { value }
                })
            }
            AggregateOperator::Average => {
                let (sum, count) = match token {
                    None => (Some(0.0), 0),
                    Some(raw) => {
                        let parsed: Value = serde_json::from_str(raw).map_err(|e| {
                            QueryError::malformed_token(
                                AVERAGE_STAGE,
                                format!("average token {raw:?}: {e}"),
                            )
                        })?;
                        let count = parsed
                            .get("count")
                            .and_then(Value::as_u64)
                            .ok_or_else(|| {
                                QueryError::malformed_token(
                                    AVERAGE_STAGE,
                                    format!("average token {raw:?} missing count"),
                                )
                            })?;
                        let sum = parsed.get("sum").and_then(Value::as_f64);
                        (sum, count)
                    }
                };
                Ok(Aggregator::Average { sum, count })
            }
        }
    }

    /// Folds one partition partial into the running state. `None` is an
    /// undefined partial.
    pub fn aggregate(&mut self, partial: Option<&Value>) {
        match self {
            Aggregator::Count { count } => {
                // Counts accumulate as 64-bit integers; going through f64
                // would lose precision past the double mantissa.
                if let Some(n) = partial.and_then(Value::as_i64) {
                    *count += n;
                }
            }
            Aggregator::Sum { sum } => match partial.and_then(Value::as_f64) {
                Some(n) => {
                    if let Some(s) = sum {
                        *s += n;
                    }
                }
                // Undefined or non-numeric partial poisons the global sum.
                None => *sum = None,
            },
            Aggregator::Min { value } => {
                Self::fold_extreme(value, partial, std::cmp::Ordering::Less);
            }
            Aggregator::Max { value } => {
                Self::fold_extreme(value, partial, std::cmp::Ordering::Greater);
            }
            Aggregator::Average { sum, count } => {
                let Some(partial) = partial else { return };
                let partial_count = partial.get("count").and_then(Value::as_u64).unwrap_or(0);
                if partial_count == 0 {
                    return;
                }
                match partial.get("sum").and_then(Value::as_f64) {
                    Some(s) => {
                        *count += partial_count;
                        if let Some(total) = sum {
                            *total += s;
                        }
                    }
                    None => *sum = None,
                }
            }
        }
    }

    fn fold_extreme(current: &mut Option<Value>, partial: Option<&Value>, keep: std::cmp::Ordering) {
        // Non-comparable (array/object) and undefined partials are excluded
        // rather than poisoning the result.
        let Some(candidate) = partial else { return };
        if !is_comparable_scalar(candidate) {
            return;
        }
        match current {
            None => *current = Some(candidate.clone()),
            Some(existing) => {
                if compare_values(Some(candidate), Some(existing)) == keep {
                    *current = Some(candidate.clone());
                }
            }
        }
    }

    /// Global result; `None` is undefined (the synthetic item omits it).
    pub fn result(&self) -> Option<Value> {
        match self {
            Aggregator::Count { count } => Some(json!(count)),
            Aggregator::Sum { sum } => sum.and_then(|s| serde_json::Number::from_f64(s).map(Value::Number)),
            Aggregator::Min { value } | Aggregator::Max { value } => value.clone(),
            Aggregator::Average { sum, count } => {
                if *count == 0 {
                    return None;
                }
                sum.and_then(|s| {
                    serde_json::Number::from_f64(s / *count as f64).map(Value::Number)
                })
            }
        }
    }

    pub fn token(&self) -> Result<String> {
        let token = match self {
            Aggregator::Count { count } => count.to_string(),
            Aggregator::Sum { sum } => match sum {
                None => UNDEFINED_TOKEN.to_string(),
                Some(s) => {
                    let number = serde_json::Number::from_f64(*s).ok_or_else(|| {
                        QueryError::Internal(format!("sum {s} is not representable"))
                    })?;
                    number.to_string()
                }
            },
            Aggregator::Min { value } | Aggregator::Max { value } => match value {
                None => UNDEFINED_TOKEN.to_string(),
                Some(v) => serde_json::to_string(v)
                    .map_err(|e| QueryError::Internal(format!("min/max token encode: {e}")))?,
            },
            Aggregator::Average { sum, count } => {
                let body = match sum {
                    Some(s) => json!({ "sum": s, "count": count }),
                    None => json!({ "count": count }),
                };
                body.to_string()
            }
        };
        Ok(token)
    }
}

pub struct AggregateComponent {
    source: BoxedComponent,
    aggregators: Vec<Aggregator>,
    /// Single aggregate selected as a bare value: the synthetic item is the
    /// result itself, and an undefined result yields zero items.
    single_value: bool,
    emitted_final: bool,
}

impl AggregateComponent {
    pub fn try_create(
        operators: &[AggregateOperator],
        has_select_value: bool,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        if operators.is_empty() {
            return Err(QueryError::InvalidArgument(
                "aggregate stage requires at least one operator".to_string(),
            ));
        }

        let (aggregator_tokens, source_token): (Vec<Option<String>>, Option<String>) =
            match continuation {
                None => (vec![None; operators.len()], None),
                Some(raw) => {
                    let token = AggregateContinuationToken::decode(raw)?;
                    if token.aggregator_tokens.len() != operators.len() {
                        return Err(QueryError::malformed_token(
                            AggregateContinuationToken::STAGE,
                            format!(
                                "token carries {} accumulators, plan has {}",
                                token.aggregator_tokens.len(),
                                operators.len()
                            ),
                        ));
                    }
                    (
                        token.aggregator_tokens.into_iter().map(Some).collect(),
                        token.source_token,
                    )
                }
            };

        let aggregators = operators
            .iter()
            .zip(&aggregator_tokens)
            .map(|(op, token)| Aggregator::try_create(*op, token.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let source = make_source(source_token)?;
        Ok(Box::new(AggregateComponent {
            source,
            aggregators,
            single_value: operators.len() == 1 && has_select_value,
            emitted_final: false,
        }))
    }

    fn final_item(&self) -> Option<ResultItem> {
        if self.single_value {
            return self.aggregators[0]
                .result()
                .map(|value| ResultItem::new(value, ""));
        }
        let slots: Vec<Value> = self
            .aggregators
            .iter()
            .map(|agg| match agg.result() {
                Some(value) => json!({ "item": value }),
                None => json!({}),
            })
            .collect();
        Some(ResultItem::new(Value::Array(slots), ""))
    }
}

impl PipelineComponent for AggregateComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            let mut page = QueryPage::default();
            if self.emitted_final {
                return Ok(page);
            }

            // Aggregation consumes the entire source before producing its
            // one synthetic result item.
            while !self.source.is_done() {
                cancel.check()?;
                let source_page = self.source.drain(max_items, cancel).await?;
                page.absorb_metadata(&source_page);
                if let Some(failure) = source_page.failure {
                    page.failure = Some(failure);
                    return Ok(page);
                }
                for item in &source_page.items {
                    for (index, aggregator) in self.aggregators.iter_mut().enumerate() {
                        let partial = partial_slot(&item.payload, index);
                        aggregator.aggregate(partial.as_ref());
                    }
                }
            }

            self.emitted_final = true;
            page.items.extend(self.final_item());
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.emitted_final
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.emitted_final {
            return Ok(None);
        }
        let token = AggregateContinuationToken {
            source_token: self.source.continuation_token()?,
            aggregator_tokens: self
                .aggregators
                .iter()
                .map(Aggregator::token)
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(Some(token.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_sums_partials_and_round_trips() {
        let mut agg = Aggregator::try_create(AggregateOperator::Count, None).expect("create");
        agg.aggregate(Some(&json!(5)));
        agg.aggregate(Some(&json!(7)));
        agg.aggregate(None);
        assert_eq!(agg.result(), Some(json!(12)));

        let token = agg.token().expect("token");
        let resumed =
            Aggregator::try_create(AggregateOperator::Count, Some(&token)).expect("resume");
        assert_eq!(resumed.result(), Some(json!(12)));
    }

    #[test]
    fn count_keeps_integer_precision_beyond_the_double_mantissa() {
        // 2^53 + 1 is not representable as an f64.
        let mut agg = Aggregator::try_create(AggregateOperator::Count, None).expect("create");
        agg.aggregate(Some(&json!(9_007_199_254_740_993_i64)));
        agg.aggregate(Some(&json!(1)));
        assert_eq!(agg.result(), Some(json!(9_007_199_254_740_994_i64)));
    }

    #[test]
    fn count_rejects_negative_or_garbage_tokens() {
        assert!(Aggregator::try_create(AggregateOperator::Count, Some("-1")).is_err());
        assert!(Aggregator::try_create(AggregateOperator::Count, Some("abc")).is_err());
    }

    #[test]
    fn sum_poisons_to_undefined_on_non_numeric_partial() {
        let mut agg = Aggregator::try_create(AggregateOperator::Sum, None).expect("create");
        agg.aggregate(Some(&json!(1.5)));
        agg.aggregate(Some(&json!("oops")));
        agg.aggregate(Some(&json!(2.5)));
        assert_eq!(agg.result(), None);
        assert_eq!(agg.token().expect("token"), "undefined");
    }

    #[test]
    fn min_excludes_non_comparable_partials() {
        let mut agg = Aggregator::try_create(AggregateOperator::Min, None).expect("create");
        agg.aggregate(Some(&json!([1, 2])));
        agg.aggregate(Some(&json!(9)));
        agg.aggregate(Some(&json!(3)));
        agg.aggregate(Some(&json!("a")));
        // Numbers sort before strings in the document-store type order.
        assert_eq!(agg.result(), Some(json!(3)));
    }

    #[test]
    fn average_combines_partial_sums_and_counts() {
        let mut agg = Aggregator::try_create(AggregateOperator::Average, None).expect("create");
        agg.aggregate(Some(&json!({"sum": 10.0, "count": 2})));
        agg.aggregate(Some(&json!({"sum": 20.0, "count": 3})));
        agg.aggregate(Some(&json!({"count": 0})));
        assert_eq!(agg.result(), Some(json!(6.0)));

        let token = agg.token().expect("token");
        let resumed =
            Aggregator::try_create(AggregateOperator::Average, Some(&token)).expect("resume");
        assert_eq!(resumed.result(), Some(json!(6.0)));
    }
}
