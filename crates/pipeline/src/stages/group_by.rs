//! Client-side GROUP BY over per-partition partial aggregates.
//!
//! Wire contract with the transport layer: every source item's payload is an
//! object `{"groupByItems": [<key values>], "payload": {<alias>: <partial>}}`
//! (the plan's rewritten query projects both). Aggregated aliases fold their
//! partials through the same accumulators the aggregate stage uses; plain
//! aliases keep the first value seen for the group.
//!
//! Unsorted input means a group can receive contributions until the source
//! is fully exhausted, so nothing is emitted before then and the stage is
//! not resumable mid-flight: requesting a continuation token while still
//! aggregating fails explicitly.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use cpq_common::{CancellationToken, QueryError, Result};

use cpq_plan::AggregateOperator;

use crate::page::QueryPage;
use crate::stages::aggregate::Aggregator;
use crate::{BoxedComponent, PipelineComponent};

use super::SourceFactory;

const STAGE: &str = "group-by stage";

/// Per-alias state within one group.
enum AliasState {
    Aggregate(Aggregator),
    /// Key projection; holds the first value seen for the group.
    Scalar(Option<Value>),
}

struct GroupState {
    aliases: BTreeMap<String, AliasState>,
}

pub struct GroupByComponent {
    source: BoxedComponent,
    alias_to_aggregate: BTreeMap<String, Option<AggregateOperator>>,
    groups: BTreeMap<String, GroupState>,
    /// Materialized output rows, filled once the source is exhausted.
    output: VecDeque<Value>,
    materialized: bool,
}

impl GroupByComponent {
    pub fn try_create(
        alias_to_aggregate: BTreeMap<String, Option<AggregateOperator>>,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        if alias_to_aggregate.is_empty() {
            return Err(QueryError::InvalidArgument(
                "group-by stage requires at least one projected alias".to_string(),
            ));
        }
        if continuation.is_some() {
            return Err(QueryError::ContinuationNotSupported(
                "group-by queries cannot resume from a continuation token".to_string(),
            ));
        }

        let source = make_source(None)?;
        Ok(Box::new(GroupByComponent {
            source,
            alias_to_aggregate,
            groups: BTreeMap::new(),
            output: VecDeque::new(),
            materialized: false,
        }))
    }

    fn fold_item(&mut self, payload: &Value) -> Result<()> {
        let object = payload.as_object().ok_or_else(|| {
            QueryError::Internal("group-by item payload is not an object".to_string())
        })?;
        let key_items = object.get("groupByItems").ok_or_else(|| {
            QueryError::Internal("group-by item payload is missing groupByItems".to_string())
        })?;
        let partials = object
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                QueryError::Internal("group-by item payload is missing its payload".to_string())
            })?;

        let key = key_items.to_string();
        let alias_to_aggregate = &self.alias_to_aggregate;
        let group = match self.groups.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let mut aliases = BTreeMap::new();
                for (alias, operator) in alias_to_aggregate {
                    let state = match operator {
                        Some(op) => AliasState::Aggregate(Aggregator::try_create(*op, None)?),
                        None => AliasState::Scalar(None),
                    };
                    aliases.insert(alias.clone(), state);
                }
                entry.insert(GroupState { aliases })
            }
        };

        for (alias, state) in &mut group.aliases {
            let partial = partials.get(alias);
            match state {
                AliasState::Aggregate(aggregator) => aggregator.aggregate(partial),
                AliasState::Scalar(value) => {
                    if value.is_none() {
                        *value = partial.cloned();
                    }
                }
            }
        }
        Ok(())
    }

    fn materialize(&mut self) {
        let groups = std::mem::take(&mut self.groups);
        for (_, group) in groups {
            let mut row = Map::new();
            for (alias, state) in group.aliases {
                let value = match state {
                    AliasState::Aggregate(aggregator) => aggregator.result(),
                    AliasState::Scalar(value) => value,
                };
                // Undefined alias values are omitted from the row.
                if let Some(value) = value {
                    row.insert(alias, value);
                }
            }
            self.output.push_back(Value::Object(row));
        }
        self.materialized = true;
    }
}

impl PipelineComponent for GroupByComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            let mut page = QueryPage::default();

            if !self.materialized {
                while !self.source.is_done() {
                    cancel.check()?;
                    let source_page = self.source.drain(max_items, cancel).await?;
                    page.absorb_metadata(&source_page);
                    if let Some(failure) = source_page.failure {
                        page.failure = Some(failure);
                        return Ok(page);
                    }
                    for item in &source_page.items {
                        self.fold_item(&item.payload)?;
                    }
                }
                self.materialize();
            }

            cancel.check()?;
            while page.items.len() < max_items {
                match self.output.pop_front() {
                    Some(row) => page
                        .items
                        .push(crate::item::ResultItem::new(row, "")),
                    None => break,
                }
            }
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.materialized && self.output.is_empty()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.is_done() {
            return Ok(None);
        }
        Err(QueryError::ContinuationNotSupported(format!(
            "{STAGE} cannot produce a token while still aggregating"
        )))
    }
}
