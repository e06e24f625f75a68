//! DISTINCT de-duplication stage.
//!
//! Two map variants with very different resumption cost:
//! - unordered: an unbounded set of 128-bit content hashes over every
//!   accepted item; the token carries the whole set;
//! - ordered: only the immediately preceding distinct item's hash, valid
//!   only because a globally sorted source keeps duplicates adjacent.
//!
//! The caller's [`DistinctQueryType`] must match the source's actual
//! ordering; the engine cannot verify the pairing at runtime, and a mismatch
//! silently filters incorrectly.

use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sha2::{Digest, Sha256};

use cpq_common::{CancellationToken, QueryError, Result};

use cpq_plan::DistinctQueryType;

use crate::page::QueryPage;
use crate::token::{DistinctContinuationToken, DistinctMapToken};
use crate::{BoxedComponent, PipelineComponent};

use super::SourceFactory;

/// 128-bit content hash over the canonical form of a JSON value: object
/// members are hashed in key order, so logically equal values hash equally
/// regardless of member order on the wire.
pub fn content_hash(value: &Value) -> u128 {
    let mut hasher = Sha256::new();
    hash_value(value, &mut hasher);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(bytes)
}

fn hash_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update([0u8]),
        Value::Bool(false) => hasher.update([1u8]),
        Value::Bool(true) => hasher.update([2u8]),
        Value::Number(n) => {
            hasher.update([3u8]);
            hasher.update(n.as_f64().unwrap_or(f64::NAN).to_be_bytes());
        }
        Value::String(s) => {
            hasher.update([4u8]);
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update([5u8]);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(members) => {
            hasher.update([6u8]);
            hasher.update((members.len() as u64).to_be_bytes());
            let mut keys: Vec<&String> = members.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key.as_bytes());
                hash_value(&members[key], hasher);
            }
        }
    }
}

/// Resumable de-duplication state.
#[derive(Debug)]
pub enum DistinctMap {
    /// Hash -> accepted payloads with that hash. Entries resumed from a
    /// token carry no payloads; for those, a hash match alone counts as a
    /// duplicate. Live entries get an exact-equality check on collision.
    Unordered {
        seen: HashMap<u128, Vec<Value>>,
    },
    Ordered {
        last_hash: Option<u128>,
    },
}

impl DistinctMap {
    pub fn try_create(
        distinct_type: DistinctQueryType,
        token: Option<&DistinctMapToken>,
    ) -> Result<Self> {
        match (distinct_type, token) {
            (DistinctQueryType::Unordered, None) => Ok(DistinctMap::Unordered {
                seen: HashMap::new(),
            }),
            (DistinctQueryType::Unordered, Some(DistinctMapToken::Unordered { hashes })) => {
                let mut seen = HashMap::with_capacity(hashes.len());
                for hex in hashes {
                    let hash = u128::from_str_radix(hex, 16).map_err(|e| {
                        QueryError::malformed_token(
                            DistinctContinuationToken::STAGE,
                            format!("bad distinct hash {hex:?}: {e}"),
                        )
                    })?;
                    seen.insert(hash, Vec::new());
                }
                Ok(DistinctMap::Unordered { seen })
            }
            (DistinctQueryType::Ordered, None) => Ok(DistinctMap::Ordered { last_hash: None }),
            (DistinctQueryType::Ordered, Some(DistinctMapToken::Ordered { last_hash })) => {
                let last_hash = match last_hash {
                    None => None,
                    Some(hex) => Some(u128::from_str_radix(hex, 16).map_err(|e| {
                        QueryError::malformed_token(
                            DistinctContinuationToken::STAGE,
                            format!("bad distinct hash {hex:?}: {e}"),
                        )
                    })?),
                };
                Ok(DistinctMap::Ordered { last_hash })
            }
            (DistinctQueryType::None, _) => Err(QueryError::InvalidArgument(
                "distinct stage requires an ordered or unordered distinct type".to_string(),
            )),
            (_, Some(_)) => Err(QueryError::malformed_token(
                DistinctContinuationToken::STAGE,
                "distinct map token variant does not match the query's distinct type",
            )),
        }
    }

    /// Returns `true` when the item is the first of its kind and must pass.
    pub fn add(&mut self, payload: &Value) -> bool {
        let hash = content_hash(payload);
        match self {
            DistinctMap::Unordered { seen } => match seen.get_mut(&hash) {
                None => {
                    seen.insert(hash, vec![payload.clone()]);
                    true
                }
                Some(payloads) => {
                    if payloads.is_empty() {
                        // Resumed hash; payload unknown, hash match decides.
                        return false;
                    }
                    if payloads.iter().any(|p| p == payload) {
                        return false;
                    }
                    // Hash collision with a different payload.
                    payloads.push(payload.clone());
                    true
                }
            },
            DistinctMap::Ordered { last_hash } => {
                if *last_hash == Some(hash) {
                    false
                } else {
                    *last_hash = Some(hash);
                    true
                }
            }
        }
    }

    pub fn to_token(&self) -> DistinctMapToken {
        match self {
            DistinctMap::Unordered { seen } => {
                let mut hashes: Vec<String> =
                    seen.keys().map(|h| format!("{h:032x}")).collect();
                hashes.sort();
                DistinctMapToken::Unordered { hashes }
            }
            DistinctMap::Ordered { last_hash } => DistinctMapToken::Ordered {
                last_hash: last_hash.map(|h| format!("{h:032x}")),
            },
        }
    }
}

pub struct DistinctComponent {
    source: BoxedComponent,
    map: DistinctMap,
}

impl DistinctComponent {
    /// Peels the distinct token fragment, rebuilds the map, and hands the
    /// wrapped source fragment to `make_source`.
    pub fn try_create(
        distinct_type: DistinctQueryType,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        let (map, source_token) = match continuation {
            None => (DistinctMap::try_create(distinct_type, None)?, None),
            Some(raw) => {
                let token = DistinctContinuationToken::decode(raw)?;
                (
                    DistinctMap::try_create(distinct_type, Some(&token.distinct_map))?,
                    token.source_token,
                )
            }
        };
        let source = make_source(source_token)?;
        Ok(Box::new(DistinctComponent { source, map }))
    }
}

impl PipelineComponent for DistinctComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            let mut page = self.source.drain(max_items, cancel).await?;
            if !page.is_success() {
                return Ok(page);
            }
            page.items.retain(|item| self.map.add(&item.payload));
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.source.is_done()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.is_done() {
            return Ok(None);
        }
        let token = DistinctContinuationToken {
            source_token: self.source.continuation_token()?,
            distinct_map: self.map.to_token(),
        };
        Ok(Some(token.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_ignores_object_member_order() {
        let a = json!({"x": 1, "y": [true, null]});
        let b = serde_json::from_str::<Value>(r#"{"y": [true, null], "x": 1}"#).expect("json");
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&json!({"x": 1, "y": [null, true]})));
    }

    #[test]
    fn unordered_map_round_trips_through_token() {
        let mut map = DistinctMap::try_create(DistinctQueryType::Unordered, None).expect("map");
        assert!(map.add(&json!({"a": 1})));
        assert!(map.add(&json!({"a": 2})));
        assert!(!map.add(&json!({"a": 1})));

        let token = map.to_token();
        let mut resumed =
            DistinctMap::try_create(DistinctQueryType::Unordered, Some(&token)).expect("resume");
        assert!(!resumed.add(&json!({"a": 1})));
        assert!(!resumed.add(&json!({"a": 2})));
        assert!(resumed.add(&json!({"a": 3})));
        assert_eq!(
            match resumed.to_token() {
                DistinctMapToken::Unordered { hashes } => hashes.len(),
                _ => panic!("wrong variant"),
            },
            3
        );
    }

    #[test]
    fn ordered_map_only_tracks_adjacent_duplicates() {
        let mut map = DistinctMap::try_create(DistinctQueryType::Ordered, None).expect("map");
        assert!(map.add(&json!(1)));
        assert!(!map.add(&json!(1)));
        assert!(map.add(&json!(2)));
        // Sorted input never revisits a value, so this re-acceptance is the
        // documented cost of using the ordered variant on unsorted input.
        assert!(map.add(&json!(1)));
    }

    #[test]
    fn mismatched_token_variant_is_malformed() {
        let token = DistinctMapToken::Ordered { last_hash: None };
        let err = DistinctMap::try_create(DistinctQueryType::Unordered, Some(&token))
            .expect_err("mismatch");
        assert!(matches!(
            err,
            QueryError::MalformedContinuationToken { stage, .. }
                if stage == DistinctContinuationToken::STAGE
        ));
    }
}
