//! Top-level failure/retry policy wrappers.
//!
//! Both wrap the whole pipeline rather than any single stage:
//! - [`CatchAllComponent`] converts internal faults into a terminal failed
//!   page; an inner pipeline's state after an unexpected fault is not
//!   trusted, so one failure ends the query.
//! - [`StaleMetadataRetryComponent`] rebuilds the entire pipeline from a
//!   factory closure when the very first drain reports stale routing
//!   metadata, after forcing a cache refresh. Exactly one rebuild, as an
//!   explicit loop rather than recursion, and never once any page has been
//!   delivered (partial cross-range results cannot be redone against a
//!   changed collection identity).

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use cpq_common::{status_code, sub_status_code, CancellationToken, QueryError, Result};

use crate::executor::RoutingCacheRefresher;
use crate::page::{QueryFailure, QueryPage};
use crate::{BoxedComponent, PipelineComponent};

pub struct CatchAllComponent {
    inner: BoxedComponent,
    hit_failure: bool,
}

impl CatchAllComponent {
    pub fn new(inner: BoxedComponent) -> Self {
        Self {
            inner,
            hit_failure: false,
        }
    }

    fn failure_from_error(error: &QueryError) -> QueryFailure {
        match error {
            QueryError::MalformedContinuationToken { .. }
            | QueryError::UnsupportedQueryFeatures { .. }
            | QueryError::ContinuationNotSupported(_)
            | QueryError::InvalidArgument(_) => QueryFailure::new(
                status_code::BAD_REQUEST,
                sub_status_code::UNKNOWN,
                error.to_string(),
            ),
            _ => QueryFailure::internal(error.to_string()),
        }
    }
}

impl PipelineComponent for CatchAllComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            if self.is_done() {
                return Err(QueryError::InvalidArgument(
                    "cannot drain a pipeline that is already done".to_string(),
                ));
            }
            cancel.check()?;

            let page = match self.inner.drain(max_items, cancel).await {
                Ok(page) => page,
                // Cancellation aborts the call without poisoning the
                // pipeline; committed tokens stay valid for retry.
                Err(QueryError::Cancelled) => return Err(QueryError::Cancelled),
                Err(error) => {
                    warn!(%error, "pipeline drain fault converted to failed page");
                    QueryPage::from_failure(Self::failure_from_error(&error))
                }
            };

            if !page.is_success() {
                self.hit_failure = true;
            }
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.hit_failure || self.inner.is_done()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        self.inner.continuation_token()
    }
}

/// Rebuilds the whole inner pipeline; invoked once at construction and once
/// more on a first-drain stale-metadata retry.
pub type PipelineFactory = Box<dyn Fn() -> Result<BoxedComponent> + Send>;

pub struct StaleMetadataRetryComponent {
    refresher: Arc<dyn RoutingCacheRefresher>,
    collection: String,
    factory: PipelineFactory,
    current: BoxedComponent,
    already_retried: bool,
    delivered_any_page: bool,
}

impl StaleMetadataRetryComponent {
    pub fn try_create(
        refresher: Arc<dyn RoutingCacheRefresher>,
        collection: impl Into<String>,
        factory: PipelineFactory,
    ) -> Result<Self> {
        let current = factory()?;
        Ok(Self {
            refresher,
            collection: collection.into(),
            factory,
            current,
            already_retried: false,
            delivered_any_page: false,
        })
    }
}

impl PipelineComponent for StaleMetadataRetryComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            cancel.check()?;
            loop {
                let page = self.current.drain(max_items, cancel).await?;

                let stale = page
                    .failure
                    .as_ref()
                    .is_some_and(QueryFailure::is_name_cache_stale);
                if stale && !self.already_retried && !self.delivered_any_page {
                    // The whole pipeline was built against stale routing
                    // metadata; refresh and rebuild from scratch, discarding
                    // the original (it is not resumed).
                    debug!(
                        collection = %self.collection,
                        "stale routing metadata on first drain; rebuilding pipeline"
                    );
                    self.refresher
                        .force_refresh(&self.collection, cancel)
                        .await?;
                    self.already_retried = true;
                    self.current = (self.factory)()?;
                    continue;
                }

                if page.is_success() {
                    self.delivered_any_page = true;
                }
                return Ok(page);
            }
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.current.is_done()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        self.current.continuation_token()
    }
}
