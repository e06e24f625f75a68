//! Parallel (unordered) cross-partition execution context.
//!
//! Responsibilities:
//! - own one producer per active range (arena replaced-not-mutated on split);
//! - issue up to `max_concurrency` partition fetches at once, gated by the
//!   buffered-item backpressure limit;
//! - emit one producer's buffered page per drain, in round-robin order, with
//!   no cross-range ordering guarantee;
//! - assemble the composite continuation token from non-terminal producers.
//!
//! Failure semantics: a single producer failure is surfaced as the page
//! result for this drain; no other producer's committed token advances past
//! what was already durably fetched, so retrying with the returned composite
//! token re-issues only the unfinished ranges.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use cpq_common::{CancellationToken, QueryError, QueryExecutionConfig, Result};

use crate::executor::PartitionRequestExecutor;
use crate::page::QueryPage;
use crate::producer::{PartitionProducer, ProducerEvent};
use crate::range::PartitionRange;
use crate::token::{CompositeContinuationToken, RangeContinuation};
use crate::PipelineComponent;

pub struct ParallelContext {
    producers: Vec<PartitionProducer>,
    config: QueryExecutionConfig,
    /// Round-robin cursor over the producer arena.
    next_emit: usize,
}

impl ParallelContext {
    /// Builds a context over `ranges`, or resumes from a composite token.
    /// Resuming narrows the arena to the token's still-active ranges.
    pub fn try_create(
        executor: Arc<dyn PartitionRequestExecutor>,
        ranges: Vec<PartitionRange>,
        config: QueryExecutionConfig,
        continuation: Option<&str>,
    ) -> Result<Self> {
        let producers = match continuation {
            None => {
                if ranges.is_empty() {
                    return Err(QueryError::InvalidArgument(
                        "parallel context requires at least one partition range".to_string(),
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
                let token = CompositeContinuationToken::decode(raw)?;
                token
                    .ranges
                    .into_iter()
                    .map(|entry| {
                        PartitionProducer::with_token(
                            Arc::clone(&executor),
                            entry.range,
                            entry.token,
                        )
                    })
                    .collect()
            }
        };

        Ok(Self {
            producers,
            config,
            next_emit: 0,
        })
    }

    fn total_buffered(&self) -> usize {
        self.producers.iter().map(|p| p.buffered_len()).sum()
    }

    /// Runs concurrent fetch rounds until at least one producer has buffered
    /// items, a failure surfaces, or nothing is left to fetch. Returns the
    /// accumulated page metadata (charge/diagnostics) and, on failure, the
    /// failed page.
    async fn fill_buffers(
        &mut self,
        page_size_hint: usize,
        cancel: &CancellationToken,
        page: &mut QueryPage,
    ) -> Result<()> {
        loop {
            cancel.check()?;

            if self.total_buffered() > 0 {
                return Ok(());
            }

            // Backpressure: concurrent fetches are capped so the estimated
            // buffered item count (one hinted page per in-flight fetch) stays
            // under the configured limit.
            let budget = self
                .config
                .effective_buffered_item_count()
                .saturating_sub(self.total_buffered());
            if budget == 0 {
                return Ok(());
            }
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

            // Splits replace producers after the whole round so indices stay
            // stable while outcomes are applied. Every outcome of the round
            // is applied even after a failure: sibling pages were durably
            // fetched and their committed tokens must reflect that.
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

            // Replace split producers back-to-front so earlier indices stay
            // valid; children start at the split range's arena slot.
            splits.sort_by(|a, b| b.0.cmp(&a.0));
            for (index, child_ranges) in splits {
                let removed = self.producers.remove(index);
                let children = removed.split_children(child_ranges)?;
                debug!(
                    range = %removed.range().id,
                    children = children.len(),
                    "replacing split producer"
                );
                for (offset, child) in children.into_iter().enumerate() {
                    self.producers.insert(index + offset, child);
                }
            }

            if page.failure.is_some() {
                return Ok(());
            }
        }
    }

    /// Pops the next buffered page in round-robin order. The chosen
    /// producer's buffer is emitted whole: the composite token has per-page
    /// granularity, so splitting a backend page across drains would lose the
    /// undelivered remainder on resume. The page-size hint already caps the
    /// backend page near `max_items`; an executor overshooting its hint
    /// yields a correspondingly larger page.
    fn emit_page(&mut self, page: &mut QueryPage) {
        if self.producers.is_empty() {
            return;
        }
        let count = self.producers.len();
        for step in 0..count {
            let index = (self.next_emit + step) % count;
            if self.producers[index].buffered_len() == 0 {
                continue;
            }
            while let Some(item) = self.producers[index].pop() {
                page.items.push(item);
            }
            self.next_emit = (index + 1) % count;
            break;
        }
        self.producers.retain(|p| !p.is_exhausted());
        if self.next_emit >= self.producers.len() {
            self.next_emit = 0;
        }
    }
}

impl PipelineComponent for ParallelContext {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            cancel.check()?;
            let mut page = QueryPage::default();
            if max_items == 0 {
                return Err(QueryError::InvalidArgument(
                    "drain requires max_items >= 1".to_string(),
                ));
            }

            let page_size_hint = self.config.effective_page_size_hint().min(max_items);
            self.fill_buffers(page_size_hint, cancel, &mut page).await?;
            if page.failure.is_some() {
                return Ok(page);
            }

            cancel.check()?;
            self.emit_page(&mut page);
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.producers.iter().all(|p| p.is_exhausted())
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        let ranges: Vec<RangeContinuation> = self
            .producers
            .iter()
            .filter(|p| !p.is_exhausted())
            .map(|p| RangeContinuation {
                range: p.range().clone(),
                token: p.resume_token().map(str::to_string),
            })
            .collect();
        if ranges.is_empty() {
            return Ok(None);
        }
        Ok(Some(CompositeContinuationToken { ranges }.encode()?))
    }
}
