//! External collaborator interfaces consumed by the pipeline.
//!
//! Splits, throttles, and backend failures are expected, frequent outcomes of
//! a partition fetch, so they are tagged variants of [`FetchOutcome`], never
//! `Err` values. `Err` is reserved for cancellation and internal faults.

use std::time::Duration;

use futures::future::BoxFuture;

use cpq_common::{ActivityId, CancellationToken, Result};

use crate::item::ResultItem;
use crate::page::QueryFailure;
use crate::range::PartitionRange;

/// One successfully fetched backend page for a single range.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub items: Vec<ResultItem>,
    /// Next per-range token; `None` means the range is fully drained. An
    /// empty item list with a token present is legal and non-terminal.
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub diagnostics: Vec<String>,
}

/// Tagged result of a single partition request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Page(FetchedPage),
    /// The addressed range split; the caller must re-issue against the child
    /// ranges with no token (a split invalidates range-scoped tokens).
    Split { child_ranges: Vec<PartitionRange> },
    /// Rate-limited with a server-suggested delay. The pipeline never retries
    /// throttles itself; the failure propagates as a failed page.
    Throttled {
        retry_after: Duration,
        message: String,
    },
    Failed(QueryFailure),
}

/// Executes one paged request against one partition range.
///
/// This is the seam to the transport layer: HTTP/TCP, routing, connection
/// pooling, and transport-level retries all live behind it.
pub trait PartitionRequestExecutor: Send + Sync {
    fn fetch(
        &self,
        range: &PartitionRange,
        continuation: Option<&str>,
        page_size_hint: usize,
        activity_id: ActivityId,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<FetchOutcome>>;
}

/// Forces a refresh of cached routing metadata for a collection.
///
/// Consumed only by the stale-metadata retry wrapper.
pub trait RoutingCacheRefresher: Send + Sync {
    fn force_refresh(
        &self,
        collection: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<()>>;
}
