//! In-memory partition request executor used by pipeline and client tests.
//!
//! Each range holds a fixed item list served in pages; the per-range
//! continuation token is the next item offset rendered as a decimal string.
//! Outcomes (splits, throttles, failures) can be injected ahead of the next
//! fetch for a range, which is how topology-change and failure scenarios are
//! scripted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;

use cpq_common::{ActivityId, CancellationToken, QueryError, Result};

use crate::executor::{
    FetchOutcome, FetchedPage, PartitionRequestExecutor, RoutingCacheRefresher,
};
use crate::item::ResultItem;
use crate::range::PartitionRange;

#[derive(Default)]
struct RangeState {
    items: Vec<ResultItem>,
    page_size: usize,
    /// Outcomes returned instead of the next page, in order.
    injected: VecDeque<FetchOutcome>,
    fetch_count: usize,
}

#[derive(Default)]
struct MockState {
    ranges: HashMap<String, RangeState>,
}

/// Scriptable in-memory [`PartitionRequestExecutor`].
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a range's served items and page size.
    pub fn set_range(&self, range_id: &str, items: Vec<ResultItem>, page_size: usize) {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        state.ranges.insert(
            range_id.to_string(),
            RangeState {
                items,
                page_size: page_size.max(1),
                injected: VecDeque::new(),
                fetch_count: 0,
            },
        );
    }

    /// Queues an outcome to be returned by the range's next fetch instead of
    /// a page.
    pub fn inject(&self, range_id: &str, outcome: FetchOutcome) {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        state
            .ranges
            .entry(range_id.to_string())
            .or_default()
            .injected
            .push_back(outcome);
    }

    pub fn fetch_count(&self, range_id: &str) -> usize {
        let state = self.state.lock().expect("mock state lock poisoned");
        state
            .ranges
            .get(range_id)
            .map(|r| r.fetch_count)
            .unwrap_or(0)
    }
}

impl PartitionRequestExecutor for MockExecutor {
    fn fetch(
        &self,
        range: &PartitionRange,
        continuation: Option<&str>,
        _page_size_hint: usize,
        _activity_id: ActivityId,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<FetchOutcome>> {
        let state = Arc::clone(&self.state);
        let range_id = range.id.0.clone();
        let continuation = continuation.map(str::to_string);
        let cancel = cancel.clone();
        async move {
            cancel.check()?;
            let mut state = state.lock().expect("mock state lock poisoned");
            let range_state = state.ranges.get_mut(&range_id).ok_or_else(|| {
                QueryError::Internal(format!("mock executor has no script for range {range_id}"))
            })?;
            range_state.fetch_count += 1;

            if let Some(outcome) = range_state.injected.pop_front() {
                return Ok(outcome);
            }

            let offset: usize = match continuation.as_deref() {
                None => 0,
                Some(raw) => raw.parse().map_err(|e| {
                    QueryError::Internal(format!("mock token {raw:?} is not an offset: {e}"))
                })?,
            };
            let end = (offset + range_state.page_size).min(range_state.items.len());
            let items = range_state.items[offset..end].to_vec();
            let continuation = if end < range_state.items.len() {
                Some(end.to_string())
            } else {
                None
            };
            Ok(FetchOutcome::Page(FetchedPage {
                items,
                continuation,
                request_charge: 1.0,
                diagnostics: vec![format!("range {range_id} fetch @{offset}")],
            }))
        }
        .boxed()
    }
}

/// Refresher that counts invocations; the stale-metadata retry tests assert
/// on the count.
#[derive(Clone, Default)]
pub struct CountingRefresher {
    refreshes: Arc<Mutex<Vec<String>>>,
}

impl CountingRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.lock().expect("refresh lock poisoned").len()
    }
}

impl RoutingCacheRefresher for CountingRefresher {
    fn force_refresh(
        &self,
        collection: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        let refreshes = Arc::clone(&self.refreshes);
        let collection = collection.to_string();
        let cancel = cancel.clone();
        async move {
            cancel.check()?;
            refreshes
                .lock()
                .expect("refresh lock poisoned")
                .push(collection);
            Ok(())
        }
        .boxed()
    }
}
