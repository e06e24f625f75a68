//! Continuation-token model and string codec.
//!
//! Every token is a JSON document; the outermost pipeline stage's token wraps
//! its source stage's token as an opaque string, so the nesting order on the
//! wire is fixed (outermost stage first). Guarantees:
//! - `decode(encode(t)) == t` byte-for-byte for any token this engine produced
//! - arbitrary malformed strings fail with a structured parse error naming
//!   the owning stage, never a panic
//! - a stage constructed from a non-null unparsable token always fails;
//!   construction never silently substitutes default state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cpq_common::{QueryError, Result};

use crate::item::OrderByItem;
use crate::range::PartitionRange;

/// Serializes any token fragment to its wire string.
pub fn encode_token<T: Serialize>(token: &T) -> Result<String> {
    serde_json::to_string(token)
        .map_err(|e| QueryError::Internal(format!("continuation token encode failed: {e}")))
}

/// Parses a wire string as `stage`'s token shape, mapping every parse failure
/// to a malformed-token error naming that stage.
pub fn decode_token<T: DeserializeOwned>(raw: &str, stage: &'static str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| QueryError::malformed_token(stage, e.to_string()))
}

/// One (range, per-range token) pair. `token == None` marks a range that has
/// not been drained yet (start of range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeContinuation {
    pub range: PartitionRange,
    pub token: Option<String>,
}

/// Aggregate resumption state for the parallel cross-partition context: one
/// entry per still-active range. Entry order is irrelevant for parallel
/// resumption but preserved by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeContinuationToken {
    pub ranges: Vec<RangeContinuation>,
}

impl CompositeContinuationToken {
    pub const STAGE: &'static str = "composite token";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    /// Decodes and validates: at least one entry, and entries must not
    /// overlap in key space (overlaps would double-deliver items).
    pub fn decode(raw: &str) -> Result<Self> {
        let token: CompositeContinuationToken = decode_token(raw, Self::STAGE)?;
        token.validate()?;
        Ok(token)
    }

    fn validate(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(QueryError::malformed_token(
                Self::STAGE,
                "token must cover at least one range",
            ));
        }
        let mut sorted: Vec<&RangeContinuation> = self.ranges.iter().collect();
        sorted.sort_by(|a, b| a.range.min_inclusive.cmp(&b.range.min_inclusive));
        for pair in sorted.windows(2) {
            if pair[1].range.min_inclusive < pair[0].range.max_exclusive {
                return Err(QueryError::malformed_token(
                    Self::STAGE,
                    format!(
                        "ranges {} and {} overlap",
                        pair[0].range.id, pair[1].range.id
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// One per-range entry of an order-by token: the range continuation plus the
/// last globally emitted item's sort keys, rid, and the count of items equal
/// to that (key, rid) prefix already returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByContinuationEntry {
    pub composite: RangeContinuation,
    pub order_by_items: Vec<OrderByItem>,
    pub rid: String,
    pub skip_count: u64,
}

/// Resumption state for the order-by cross-partition context. Entry order
/// matters: it must match the global sort over range min bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderByContinuationToken {
    pub entries: Vec<OrderByContinuationEntry>,
}

impl OrderByContinuationToken {
    pub const STAGE: &'static str = "order-by token";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let token: OrderByContinuationToken = decode_token(raw, Self::STAGE)?;
        if token.entries.is_empty() {
            return Err(QueryError::malformed_token(
                Self::STAGE,
                "token must cover at least one range",
            ));
        }
        Ok(token)
    }
}

/// Serialized DISTINCT de-duplication state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistinctMapToken {
    /// Every accepted item's 128-bit content hash, hex encoded.
    Unordered { hashes: Vec<String> },
    /// Only the immediately preceding distinct item's hash; valid because a
    /// sorted source keeps duplicates adjacent.
    Ordered { last_hash: Option<String> },
}

/// DISTINCT stage token: the map state plus the wrapped source token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctContinuationToken {
    pub source_token: Option<String>,
    pub distinct_map: DistinctMapToken,
}

impl DistinctContinuationToken {
    pub const STAGE: &'static str = "distinct stage";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        decode_token(raw, Self::STAGE)
    }
}

/// Aggregate stage token: one opaque fragment per accumulator, aligned with
/// the plan's operator order, plus the wrapped source token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateContinuationToken {
    pub source_token: Option<String>,
    pub aggregator_tokens: Vec<String>,
}

impl AggregateContinuationToken {
    pub const STAGE: &'static str = "aggregate stage";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        decode_token(raw, Self::STAGE)
    }
}

/// OFFSET stage token: the remaining skip counter plus the source token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetContinuationToken {
    pub offset: u64,
    pub source_token: Option<String>,
}

impl OffsetContinuationToken {
    pub const STAGE: &'static str = "offset stage";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        decode_token(raw, Self::STAGE)
    }
}

/// LIMIT/TOP stage token: the remaining yield counter plus the source token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitContinuationToken {
    pub limit: u64,
    pub source_token: Option<String>,
}

impl LimitContinuationToken {
    pub const STAGE: &'static str = "limit stage";
    pub const TOP_STAGE: &'static str = "top stage";

    pub fn encode(&self) -> Result<String> {
        encode_token(self)
    }

    pub fn decode(raw: &str, stage: &'static str) -> Result<Self> {
        decode_token(raw, stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(id: &str, min: &str, max: &str) -> PartitionRange {
        PartitionRange::new(id, min, max)
    }

    #[test]
    fn composite_round_trips_byte_for_byte() {
        let token = CompositeContinuationToken {
            ranges: vec![
                RangeContinuation {
                    range: range("1", "", "7F"),
                    token: Some("backend-token-1".to_string()),
                },
                RangeContinuation {
                    range: range("2", "7F", "FF"),
                    token: None,
                },
            ],
        };
        let encoded = token.encode().expect("encode");
        let decoded = CompositeContinuationToken::decode(&encoded).expect("decode");
        assert_eq!(decoded, token);
        assert_eq!(decoded.encode().expect("re-encode"), encoded);
    }

    #[test]
    fn composite_rejects_overlapping_ranges() {
        let token = CompositeContinuationToken {
            ranges: vec![
                RangeContinuation {
                    range: range("1", "", "90"),
                    token: None,
                },
                RangeContinuation {
                    range: range("2", "7F", "FF"),
                    token: None,
                },
            ],
        };
        let encoded = token.encode().expect("encode");
        let err = CompositeContinuationToken::decode(&encoded).expect_err("overlap");
        assert!(matches!(
            err,
            QueryError::MalformedContinuationToken { stage, .. }
                if stage == CompositeContinuationToken::STAGE
        ));
    }

    #[test]
    fn composite_rejects_garbage_and_empty() {
        assert!(CompositeContinuationToken::decode("not json").is_err());
        assert!(CompositeContinuationToken::decode("[]").is_err());
        assert!(CompositeContinuationToken::decode("{\"bogus\":1}").is_err());
    }

    #[test]
    fn order_by_round_trips_with_undefined_keys() {
        let token = OrderByContinuationToken {
            entries: vec![OrderByContinuationEntry {
                composite: RangeContinuation {
                    range: range("1", "", "FF"),
                    token: Some("t".to_string()),
                },
                order_by_items: vec![
                    OrderByItem::defined(json!(42)),
                    OrderByItem::undefined(),
                ],
                rid: "rid-9".to_string(),
                skip_count: 2,
            }],
        };
        let encoded = token.encode().expect("encode");
        let decoded = OrderByContinuationToken::decode(&encoded).expect("decode");
        assert_eq!(decoded, token);
        assert_eq!(decoded.encode().expect("re-encode"), encoded);
    }

    #[test]
    fn stage_tokens_name_their_stage_on_parse_failure() {
        let err = DistinctContinuationToken::decode("{{").expect_err("bad");
        assert!(matches!(
            err,
            QueryError::MalformedContinuationToken { stage, .. }
                if stage == DistinctContinuationToken::STAGE
        ));

        let err = LimitContinuationToken::decode("17", LimitContinuationToken::TOP_STAGE)
            .expect_err("bad");
        assert!(matches!(
            err,
            QueryError::MalformedContinuationToken { stage, .. }
                if stage == LimitContinuationToken::TOP_STAGE
        ));
    }

    #[test]
    fn nested_stage_tokens_wrap_source_strings() {
        let inner = CompositeContinuationToken {
            ranges: vec![RangeContinuation {
                range: range("1", "", "FF"),
                token: Some("backend".to_string()),
            }],
        }
        .encode()
        .expect("inner");

        let outer = OffsetContinuationToken {
            offset: 3,
            source_token: Some(inner.clone()),
        };
        let encoded = outer.encode().expect("outer");
        let decoded = OffsetContinuationToken::decode(&encoded).expect("decode");
        assert_eq!(decoded.source_token.as_deref(), Some(inner.as_str()));
    }
}
