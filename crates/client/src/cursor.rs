//! The drainable cursor callers iterate.
//!
//! A cursor is the assembled pipeline wrapped in the top-level policy
//! components: the catch-all fault boundary always, and the stale-metadata
//! retry wrapper when a routing cache refresher is supplied. Ordinary query
//! failures surface as failed pages from `read_next`; `Err` is reserved for
//! cancellation and misuse.

use std::sync::Arc;

use cpq_common::{CancellationToken, QueryExecutionConfig, Result};
use cpq_plan::{QueryFeatures, QueryInfo};
use cpq_pipeline::wrappers::{CatchAllComponent, PipelineFactory, StaleMetadataRetryComponent};
use cpq_pipeline::{
    BoxedComponent, PartitionRange, PartitionRequestExecutor, QueryPage, RoutingCacheRefresher,
};

use crate::factory::build_pipeline;

pub struct QueryCursor {
    pipeline: BoxedComponent,
    page_size: usize,
}

impl QueryCursor {
    /// Builds a cursor for `plan` over `ranges`, optionally resuming from a
    /// continuation token handed out by a previous cursor.
    pub fn try_create(
        plan: &QueryInfo,
        ranges: &[PartitionRange],
        executor: Arc<dyn PartitionRequestExecutor>,
        config: QueryExecutionConfig,
        supported: QueryFeatures,
        continuation: Option<&str>,
    ) -> Result<Self> {
        let page_size = config.effective_page_size_hint();
        let inner = build_pipeline(plan, ranges, executor, &config, supported, continuation)?;
        Ok(Self {
            pipeline: Box::new(CatchAllComponent::new(inner)),
            page_size,
        })
    }

    /// Like [`Self::try_create`], but additionally retries once, with a
    /// forced routing cache refresh and a full pipeline rebuild, when the
    /// first drain reports stale collection routing metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn try_create_with_refresh(
        plan: QueryInfo,
        ranges: Vec<PartitionRange>,
        executor: Arc<dyn PartitionRequestExecutor>,
        config: QueryExecutionConfig,
        supported: QueryFeatures,
        continuation: Option<String>,
        refresher: Arc<dyn RoutingCacheRefresher>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        let page_size = config.effective_page_size_hint();
        let factory: PipelineFactory = Box::new(move || {
            build_pipeline(
                &plan,
                &ranges,
                Arc::clone(&executor),
                &config,
                supported,
                continuation.as_deref(),
            )
        });
        let retry = StaleMetadataRetryComponent::try_create(refresher, collection, factory)?;
        Ok(Self {
            pipeline: Box::new(CatchAllComponent::new(Box::new(retry))),
            page_size,
        })
    }

    pub fn has_more_results(&self) -> bool {
        !self.pipeline.is_done()
    }

    /// Drains the next page of up to the configured page size.
    ///
    /// Query failures (throttles, splits that could not be absorbed, backend
    /// errors) come back as a failed [`QueryPage`]; after one the cursor is
    /// done and further calls error.
    pub async fn read_next(&mut self, cancel: &CancellationToken) -> Result<QueryPage> {
        self.pipeline.drain(self.page_size, cancel).await
    }

    /// Token that resumes this query from the last fully delivered page, or
    /// `None` once the query is done.
    pub fn continuation_token(&self) -> Result<Option<String>> {
        self.pipeline.continuation_token()
    }
}
