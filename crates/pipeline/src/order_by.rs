//! Order-by (globally sorted) cross-partition execution context.
//!
//! Algorithm: keep every non-terminal producer holding a comparable buffered
//! head, then repeatedly pop the globally smallest head (per-expression sort
//! direction, then rid as the final tie-break). A producer whose page runs
//! out is re-drained before it is considered again. Because an empty head
//! cannot be compared, the first drain primes one page from every producer
//! before anything is emitted; all-empty ranges legitimately resolve to done
//! with no continuation token.
//!
//! Resumption: the merge emits in global order, so once the last emitted item
//! is `X`, every item `< X` from every range is already delivered. Each
//! still-active range therefore resumes with a filter (X's sort keys, X's
//! rid, and a skip count for items equal to that prefix) that drops the
//! re-fetched, already-delivered prefix. Split children inherit the same
//! global filter, which keeps the emitted item set identical whether or not
//! a split occurred.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use cpq_common::{CancellationToken, QueryError, QueryExecutionConfig, RangeId, Result};

use cpq_plan::SortOrder;

use crate::executor::PartitionRequestExecutor;
use crate::item::{compare_items, OrderByItem, ResultItem};
use crate::page::QueryPage;
use crate::producer::{PartitionProducer, ProducerEvent};
use crate::range::PartitionRange;
use crate::token::{
    OrderByContinuationEntry, OrderByContinuationToken, RangeContinuation,
};
use crate::PipelineComponent;

/// Sort keys, rid, and equal-prefix count of the last globally emitted item.
#[derive(Debug, Clone)]
struct EmittedMark {
    order_by_items: Vec<OrderByItem>,
    rid: String,
    /// Count of emitted items whose (keys, rid) equal this mark, including
    /// the marked item itself.
    skip_count: u64,
}

/// Per-range drop filter for re-fetched, already-delivered items.
#[derive(Debug, Clone)]
struct ResumeFilter {
    order_by_items: Vec<OrderByItem>,
    rid: String,
    remaining_equal: u64,
}

pub struct OrderByContext {
    producers: Vec<PartitionProducer>,
    sort_orders: Vec<SortOrder>,
    config: QueryExecutionConfig,
    filters: HashMap<RangeId, ResumeFilter>,
    last_emitted: Option<EmittedMark>,
}

impl OrderByContext {
    pub fn try_create(
        executor: Arc<dyn PartitionRequestExecutor>,
        ranges: Vec<PartitionRange>,
        sort_orders: Vec<SortOrder>,
        config: QueryExecutionConfig,
        continuation: Option<&str>,
    ) -> Result<Self> {
        if sort_orders.is_empty() {
            return Err(QueryError::InvalidArgument(
                "order-by context requires at least one sort order".to_string(),
            ));
        }

        let mut filters = HashMap::new();
        let mut last_emitted = None;
        let producers = match continuation {
            None => {
                if ranges.is_empty() {
                    return Err(QueryError::InvalidArgument(
                        "order-by context requires at least one partition range".to_string(),
                    ));
                }
                let mut sorted = ranges;
                sorted.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
                sorted
                    .into_iter()
                    .map(|range| PartitionProducer::new(Arc::clone(&executor), range))
                    .collect()
            }
            Some(raw) => {
                let token = OrderByContinuationToken::decode(raw)?;
                // Every entry carries the same last-emitted mark; an entry
                // with no rid and no keys means nothing was emitted yet.
                if let Some(first) = token.entries.first() {
                    if !(first.rid.is_empty() && first.order_by_items.is_empty()) {
                        last_emitted = Some(EmittedMark {
                            order_by_items: first.order_by_items.clone(),
                            rid: first.rid.clone(),
                            skip_count: first.skip_count,
                        });
                    }
                }
                let mut producers = Vec::with_capacity(token.entries.len());
                for entry in token.entries {
                    let OrderByContinuationEntry {
                        composite,
                        order_by_items,
                        rid,
                        skip_count,
                    } = entry;
                    if !(rid.is_empty() && order_by_items.is_empty()) {
                        filters.insert(
                            composite.range.id.clone(),
                            ResumeFilter {
                                order_by_items,
                                rid,
                                remaining_equal: skip_count,
                            },
                        );
                    }
                    producers.push(PartitionProducer::with_token(
                        Arc::clone(&executor),
                        composite.range,
                        composite.token,
                    ));
                }
                producers.sort_by(|a, b| {
                    a.range().min_inclusive.cmp(&b.range().min_inclusive)
                });
                producers
            }
        };

        Ok(Self {
            producers,
            sort_orders,
            config,
            filters,
            last_emitted,
        })
    }

    fn total_buffered(&self) -> usize {
        self.producers.iter().map(|p| p.buffered_len()).sum()
    }

    /// Fetches until every producer either is terminal or holds a comparable
    /// buffered head. Sets `page.failure` and stops on the first failure.
    async fn make_heads_comparable(
        &mut self,
        page_size_hint: usize,
        cancel: &CancellationToken,
        page: &mut QueryPage,
    ) -> Result<()> {
        loop {
            cancel.check()?;

            let budget = self
                .config
                .effective_buffered_item_count()
                .saturating_sub(self.total_buffered());
            let fan_out = self
                .config
                .effective_concurrency()
                .min((budget / page_size_hint).max(1));

            let candidates: Vec<usize> = self
                .producers
                .iter()
                .enumerate()
                .filter(|(_, p)| p.needs_fetch())
                .map(|(i, _)| i)
                .take(fan_out)
                .collect();
            if candidates.is_empty() {
                return Ok(());
            }

            let fetches: Vec<BoxFuture<'static, _>> = candidates
                .iter()
                .map(|&i| self.producers[i].begin_fetch(page_size_hint, cancel))
                .collect();
            let outcomes = join_all(fetches).await;

            let mut splits: Vec<(usize, Vec<PartitionRange>)> = Vec::new();
            for (&index, outcome) in candidates.iter().zip(outcomes) {
                match self.producers[index].apply_outcome(outcome?) {
                    ProducerEvent::Buffered {
                        request_charge,
                        diagnostics,
                    } => {
                        page.request_charge += request_charge;
                        page.diagnostics.extend(diagnostics);
                    }
                    ProducerEvent::Split { child_ranges } => {
                        splits.push((index, child_ranges));
                    }
                    ProducerEvent::Failure(failure) => {
                        if page.failure.is_none() {
                            page.failure = Some(failure);
                        }
                    }
                }
            }

            splits.sort_by(|a, b| b.0.cmp(&a.0));
            for (index, child_ranges) in splits {
                self.replace_with_children(index, child_ranges)?;
            }

            if page.failure.is_some() {
                return Ok(());
            }
        }
    }

    /// Swaps the split producer for fresh child producers. Children start
    /// with no token and inherit the global last-emitted filter, so the
    /// already-delivered prefix of the parent range is dropped on re-fetch.
    fn replace_with_children(
        &mut self,
        index: usize,
        child_ranges: Vec<PartitionRange>,
    ) -> Result<()> {
        let removed = self.producers.remove(index);
        self.filters.remove(&removed.range().id);
        let children = removed.split_children(child_ranges)?;
        debug!(
            range = %removed.range().id,
            children = children.len(),
            "replacing split producer in order-by merge"
        );
        for (offset, child) in children.into_iter().enumerate() {
            if let Some(mark) = &self.last_emitted {
                self.filters.insert(
                    child.range().id.clone(),
                    ResumeFilter {
                        order_by_items: mark.order_by_items.clone(),
                        rid: mark.rid.clone(),
                        remaining_equal: mark.skip_count,
                    },
                );
            }
            self.producers.insert(index + offset, child);
        }
        Ok(())
    }

    /// Index of the producer holding the globally smallest buffered head.
    fn min_head_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, producer) in self.producers.iter().enumerate() {
            let Some(head) = producer.peek() else { continue };
            match best {
                None => best = Some(index),
                Some(current) => {
                    let current_head = self.producers[current]
                        .peek()
                        .expect("best candidate always holds a head");
                    if compare_items(head, current_head, &self.sort_orders) == Ordering::Less {
                        best = Some(index);
                    }
                }
            }
        }
        best
    }

    /// Applies the popped item against its range's resume filter. Returns
    /// `true` when the item must be delivered.
    fn passes_filter(&mut self, range_id: &RangeId, item: &ResultItem) -> bool {
        let Some(filter) = self.filters.get_mut(range_id) else {
            return true;
        };
        let candidate = ResultItem {
            payload: serde_json::Value::Null,
            rid: filter.rid.clone(),
            order_by_items: filter.order_by_items.clone(),
        };
        match compare_items(item, &candidate, &self.sort_orders) {
            Ordering::Less => false,
            Ordering::Equal => {
                if filter.remaining_equal > 0 {
                    filter.remaining_equal -= 1;
                    false
                } else {
                    self.filters.remove(range_id);
                    true
                }
            }
            Ordering::Greater => {
                self.filters.remove(range_id);
                true
            }
        }
    }

    fn record_emitted(&mut self, item: &ResultItem) {
        match &mut self.last_emitted {
            Some(mark)
                if mark.rid == item.rid && mark.order_by_items == item.order_by_items =>
            {
                mark.skip_count += 1;
            }
            _ => {
                self.last_emitted = Some(EmittedMark {
                    order_by_items: item.order_by_items.clone(),
                    rid: item.rid.clone(),
                    skip_count: 1,
                });
            }
        }
    }
}

impl PipelineComponent for OrderByContext {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            cancel.check()?;
            if max_items == 0 {
                return Err(QueryError::InvalidArgument(
                    "drain requires max_items >= 1".to_string(),
                ));
            }

            let page_size_hint = self.config.effective_page_size_hint();
            let mut page = QueryPage::default();

            loop {
                // Covers both initial priming and mid-merge refills: no
                // comparison happens while a non-terminal producer's buffer
                // is empty.
                self.make_heads_comparable(page_size_hint, cancel, &mut page)
                    .await?;
                if page.failure.is_some() {
                    // Partially merged items stay committed; the failure is
                    // the page's terminal status.
                    return Ok(page);
                }

                if page.items.len() >= max_items {
                    return Ok(page);
                }

                cancel.check()?;
                let Some(index) = self.min_head_index() else {
                    // Every producer exhausted with nothing buffered.
                    return Ok(page);
                };

                let item = self.producers[index]
                    .pop()
                    .expect("min head producer holds a buffered item");
                let range_id = self.producers[index].range().id.clone();
                if self.passes_filter(&range_id, &item) {
                    self.record_emitted(&item);
                    page.items.push(item);
                }

                if self.producers[index].is_exhausted() {
                    self.producers.remove(index);
                }
            }
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.producers.iter().all(|p| p.is_exhausted())
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        let mark = self.last_emitted.as_ref();
        let entries: Vec<OrderByContinuationEntry> = self
            .producers
            .iter()
            .filter(|p| !p.is_exhausted())
            .map(|p| OrderByContinuationEntry {
                composite: RangeContinuation {
                    range: p.range().clone(),
                    token: p.resume_token().map(str::to_string),
                },
                order_by_items: mark.map(|m| m.order_by_items.clone()).unwrap_or_default(),
                rid: mark.map(|m| m.rid.clone()).unwrap_or_default(),
                skip_count: mark.map(|m| m.skip_count).unwrap_or(0),
            })
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(OrderByContinuationToken { entries }.encode()?))
    }
}
