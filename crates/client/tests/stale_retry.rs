use std::sync::Arc;

use serde_json::json;

use cpq_client::{
    CancellationToken, PartitionRange, QueryCursor, QueryExecutionConfig, QueryFeatures, QueryInfo,
};
use cpq_common::{status_code, sub_status_code};
use cpq_pipeline::testing::{CountingRefresher, MockExecutor};
use cpq_pipeline::{FetchOutcome, QueryFailure, ResultItem};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn stale_failure() -> FetchOutcome {
    FetchOutcome::Failed(QueryFailure::new(
        status_code::GONE,
        sub_status_code::NAME_CACHE_IS_STALE,
        "collection rid changed",
    ))
}

fn items(count: usize) -> Vec<ResultItem> {
    (0..count)
        .map(|i| ResultItem::new(json!({ "id": i }), format!("r{i}")))
        .collect()
}

fn cursor_with_refresher(
    executor: Arc<MockExecutor>,
    refresher: Arc<CountingRefresher>,
    page_size: usize,
) -> QueryCursor {
    QueryCursor::try_create_with_refresh(
        QueryInfo::default(),
        vec![PartitionRange::new("A", "", "FF")],
        executor,
        QueryExecutionConfig {
            page_size_hint: page_size,
            ..Default::default()
        },
        QueryFeatures::ALL,
        None,
        refresher,
        "orders",
    )
    .expect("create cursor")
}

#[tokio::test]
async fn first_drain_staleness_is_retried_transparently() {
    init_tracing();
    let executor = Arc::new(MockExecutor::new());
    executor.set_range("A", items(4), 4);
    executor.inject("A", stale_failure());
    let refresher = Arc::new(CountingRefresher::new());

    let mut cursor = cursor_with_refresher(Arc::clone(&executor), Arc::clone(&refresher), 4);
    let cancel = CancellationToken::new();

    let page = cursor.read_next(&cancel).await.expect("read");
    assert!(page.is_success(), "retry should hide the stale failure");
    assert_eq!(page.items.len(), 4);
    assert_eq!(refresher.refresh_count(), 1);
    assert_eq!(executor.fetch_count("A"), 2);
}

#[tokio::test]
async fn staleness_after_refresh_surfaces_as_failure() {
    init_tracing();
    let executor = Arc::new(MockExecutor::new());
    executor.set_range("A", items(4), 4);
    executor.inject("A", stale_failure());
    executor.inject("A", stale_failure());
    let refresher = Arc::new(CountingRefresher::new());

    let mut cursor = cursor_with_refresher(Arc::clone(&executor), Arc::clone(&refresher), 4);
    let cancel = CancellationToken::new();

    let page = cursor.read_next(&cancel).await.expect("read");
    let failure = page.failure.expect("second staleness is terminal");
    assert!(failure.is_name_cache_stale());
    assert_eq!(refresher.refresh_count(), 1);
    assert!(!cursor.has_more_results());
}

#[tokio::test]
async fn staleness_after_a_delivered_page_is_not_retried() {
    init_tracing();
    let executor = Arc::new(MockExecutor::new());
    executor.set_range("A", items(4), 2);
    let refresher = Arc::new(CountingRefresher::new());

    let mut cursor = cursor_with_refresher(Arc::clone(&executor), Arc::clone(&refresher), 2);
    let cancel = CancellationToken::new();

    let first = cursor.read_next(&cancel).await.expect("read");
    assert_eq!(first.items.len(), 2);

    // A retry here would rebuild from scratch and replay delivered items.
    executor.inject("A", stale_failure());
    let second = cursor.read_next(&cancel).await.expect("read");
    let failure = second.failure.expect("staleness surfaces");
    assert!(failure.is_name_cache_stale());
    assert_eq!(refresher.refresh_count(), 0);
}
