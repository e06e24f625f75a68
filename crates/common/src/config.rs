use serde::{Deserialize, Serialize};

/// Execution knobs for one cross-partition query.
///
/// All limits are per query-cursor instance, not global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecutionConfig {
    /// Max concurrent partition drains issued by the parallel context.
    pub max_concurrency: usize,
    /// Max items buffered across all producers before backpressure stalls
    /// further drains until the caller consumes a page.
    pub max_buffered_item_count: usize,
    /// Page-size hint forwarded to the partition request executor.
    pub page_size_hint: usize,
}

impl Default for QueryExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_buffered_item_count: 1000,
            page_size_hint: 100,
        }
    }
}

impl QueryExecutionConfig {
    /// Concurrency clamped to at least one in-flight drain.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Buffered-item limit clamped so a single page can always be fetched.
    pub fn effective_buffered_item_count(&self) -> usize {
        self.max_buffered_item_count.max(self.page_size_hint.max(1))
    }

    /// Page-size hint clamped to at least one item.
    pub fn effective_page_size_hint(&self) -> usize {
        self.page_size_hint.max(1)
    }
}
