//! Per-range page producer.
//!
//! Responsibilities:
//! - hide pagination for exactly one partition range behind a buffered
//!   peek/pop interface;
//! - track the range's committed continuation token (mutated only on a
//!   successful fetch, so a failed drain never advances resumption state);
//! - surface splits and failures as tagged events for the owning context.
//!
//! Fetch issuance and application are separated: [`PartitionProducer::begin_fetch`]
//! captures the committed (range, token) pair into an owned future so the
//! parallel context can run several fetches concurrently, and
//! [`PartitionProducer::apply_outcome`] commits the result afterwards.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use cpq_common::{ActivityId, CancellationToken, QueryError, Result};

use crate::executor::{FetchOutcome, PartitionRequestExecutor};
use crate::item::ResultItem;
use crate::page::QueryFailure;
use crate::range::PartitionRange;

/// Outcome of applying one fetch to a producer.
#[derive(Debug)]
pub enum ProducerEvent {
    /// A page was buffered; cost/diagnostics are additive into the page
    /// returned upward.
    Buffered {
        request_charge: f64,
        diagnostics: Vec<String>,
    },
    /// The range split. The owning context must replace this producer with
    /// one fresh producer per child range, each starting with no token.
    Split { child_ranges: Vec<PartitionRange> },
    /// The fetch failed; the committed token is unchanged, so a retry with
    /// the current composite token re-issues only this range.
    Failure(QueryFailure),
}

pub struct PartitionProducer {
    executor: Arc<dyn PartitionRequestExecutor>,
    range: PartitionRange,
    current_token: Option<String>,
    /// Token that re-fetches the page the oldest still-buffered item came
    /// from. Used for resumption while buffered items have not been
    /// delivered; equal to `current_token` whenever the buffer is empty.
    resume_base: Option<String>,
    buffer: VecDeque<ResultItem>,
    terminal: bool,
}

impl PartitionProducer {
    /// A producer at the start of its range (no token).
    pub fn new(executor: Arc<dyn PartitionRequestExecutor>, range: PartitionRange) -> Self {
        Self::with_token(executor, range, None)
    }

    /// A producer resuming from a committed per-range token.
    pub fn with_token(
        executor: Arc<dyn PartitionRequestExecutor>,
        range: PartitionRange,
        token: Option<String>,
    ) -> Self {
        Self {
            executor,
            range,
            resume_base: token.clone(),
            current_token: token,
            buffer: VecDeque::new(),
            terminal: false,
        }
    }

    pub fn range(&self) -> &PartitionRange {
        &self.range
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn peek(&self) -> Option<&ResultItem> {
        self.buffer.front()
    }

    pub fn pop(&mut self) -> Option<ResultItem> {
        let item = self.buffer.pop_front();
        if self.buffer.is_empty() {
            self.resume_base = self.current_token.clone();
        }
        item
    }

    /// Token to resume this range from without losing buffered, undelivered
    /// items: re-fetches the partially consumed page when one is buffered
    /// (the caller's resumption filter de-duplicates the delivered prefix),
    /// otherwise the committed token.
    pub fn resume_token(&self) -> Option<&str> {
        if self.buffer.is_empty() {
            self.current_token.as_deref()
        } else {
            self.resume_base.as_deref()
        }
    }

    /// Whether another fetch could still yield items. An empty page with a
    /// token present is non-terminal; only a fetch returning no token ends
    /// the range.
    pub fn has_more_pages(&self) -> bool {
        !self.terminal
    }

    /// Terminal with nothing buffered: this producer contributes no further
    /// items and drops out of the composite token.
    pub fn is_exhausted(&self) -> bool {
        self.terminal && self.buffer.is_empty()
    }

    /// Whether this producer needs a fetch before it can be merged from.
    pub fn needs_fetch(&self) -> bool {
        !self.terminal && self.buffer.is_empty()
    }

    /// Starts a fetch for the next page against the committed (range, token)
    /// pair. The returned future owns its captures; nothing is committed
    /// until [`Self::apply_outcome`].
    pub fn begin_fetch(
        &self,
        page_size_hint: usize,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<FetchOutcome>> {
        let activity_id = ActivityId::next();
        debug!(
            range = %self.range.id,
            activity = %activity_id,
            has_token = self.current_token.is_some(),
            "partition fetch"
        );
        self.executor.fetch(
            &self.range,
            self.current_token.as_deref(),
            page_size_hint,
            activity_id,
            cancel,
        )
    }

    /// Commits one fetch outcome, buffering the page or reporting the split
    /// or failure upward.
    pub fn apply_outcome(&mut self, outcome: FetchOutcome) -> ProducerEvent {
        match outcome {
            FetchOutcome::Page(page) => {
                if self.buffer.is_empty() {
                    self.resume_base = self.current_token.clone();
                }
                self.terminal = page.continuation.is_none();
                self.current_token = page.continuation;
                self.buffer.extend(page.items);
                ProducerEvent::Buffered {
                    request_charge: page.request_charge,
                    diagnostics: page.diagnostics,
                }
            }
            FetchOutcome::Split { child_ranges } => {
                warn!(
                    range = %self.range.id,
                    children = child_ranges.len(),
                    "partition range split"
                );
                ProducerEvent::Split { child_ranges }
            }
            FetchOutcome::Throttled {
                retry_after,
                message,
            } => {
                debug!(range = %self.range.id, ?retry_after, "partition fetch throttled");
                ProducerEvent::Failure(QueryFailure::throttled(retry_after, message))
            }
            FetchOutcome::Failed(failure) => {
                warn!(
                    range = %self.range.id,
                    status = failure.status_code,
                    sub_status = failure.sub_status_code,
                    "partition fetch failed"
                );
                ProducerEvent::Failure(failure)
            }
        }
    }

    /// Replacement children for a split, each starting with no token. The
    /// child set must exactly tile this producer's range; a gapped or
    /// overlapping set would lose or double-deliver items.
    pub fn split_children(
        &self,
        child_ranges: Vec<PartitionRange>,
    ) -> Result<Vec<PartitionProducer>> {
        if !self.range.children_cover(&child_ranges) {
            return Err(QueryError::Internal(format!(
                "split children do not exactly tile range {}",
                self.range.id
            )));
        }
        Ok(child_ranges
            .into_iter()
            .map(|child| PartitionProducer::new(Arc::clone(&self.executor), child))
            .collect())
    }
}
