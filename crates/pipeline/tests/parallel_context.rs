use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cpq_common::{CancellationToken, QueryExecutionConfig};
use cpq_pipeline::testing::MockExecutor;
use cpq_pipeline::{
    FetchOutcome, ParallelContext, PartitionRange, PartitionRequestExecutor, PipelineComponent,
    QueryPage, ResultItem,
};

fn config(page_size_hint: usize) -> QueryExecutionConfig {
    QueryExecutionConfig {
        page_size_hint,
        ..Default::default()
    }
}

fn items(prefix: &str, count: usize) -> Vec<ResultItem> {
    (0..count)
        .map(|i| {
            let rid = format!("{prefix}{i}");
            ResultItem::new(json!({ "id": rid }), rid.clone())
        })
        .collect()
}

fn rids(page: &QueryPage) -> Vec<String> {
    page.items.iter().map(|item| item.rid.clone()).collect()
}

async fn drain_to_end(context: &mut ParallelContext, cancel: &CancellationToken) -> Vec<String> {
    let mut collected = Vec::new();
    while !context.is_done() {
        let page = context.drain(100, cancel).await.expect("drain");
        assert!(page.is_success(), "unexpected failure: {:?}", page.failure);
        collected.extend(rids(&page));
    }
    collected
}

#[tokio::test]
async fn single_range_pages_then_remainder() {
    let executor = MockExecutor::new();
    executor.set_range("0", items("a", 12), 5);
    let ranges = vec![PartitionRange::new("0", "", "FF")];
    let cancel = CancellationToken::new();

    let mut context =
        ParallelContext::try_create(Arc::new(executor), ranges, config(5), None).expect("create");

    let first = context.drain(100, &cancel).await.expect("first drain");
    let second = context.drain(100, &cancel).await.expect("second drain");
    let third = context.drain(100, &cancel).await.expect("third drain");

    assert_eq!(rids(&first), vec!["a0", "a1", "a2", "a3", "a4"]);
    assert_eq!(rids(&second), vec!["a5", "a6", "a7", "a8", "a9"]);
    assert_eq!(rids(&third), vec!["a10", "a11"]);
    assert!(context.is_done());
    assert_eq!(context.continuation_token().expect("token"), None);
}

#[tokio::test]
async fn round_robin_alternates_between_ranges() {
    let executor = MockExecutor::new();
    executor.set_range("A", items("a", 4), 2);
    executor.set_range("B", items("b", 4), 2);
    let ranges = vec![
        PartitionRange::new("A", "", "7F"),
        PartitionRange::new("B", "7F", "FF"),
    ];
    let cancel = CancellationToken::new();

    let mut context =
        ParallelContext::try_create(Arc::new(executor), ranges, config(2), None).expect("create");

    let mut pages = Vec::new();
    while !context.is_done() {
        let page = context.drain(100, &cancel).await.expect("drain");
        pages.push(rids(&page));
    }

    assert_eq!(
        pages,
        vec![
            vec!["a0", "a1"],
            vec!["b0", "b1"],
            vec!["a2", "a3"],
            vec!["b2", "b3"],
        ]
    );
}

#[tokio::test]
async fn resume_from_token_delivers_remaining_exactly_once() {
    let executor = MockExecutor::new();
    executor.set_range("A", items("a", 6), 2);
    executor.set_range("B", items("b", 6), 2);
    let ranges = vec![
        PartitionRange::new("A", "", "7F"),
        PartitionRange::new("B", "7F", "FF"),
    ];
    let cancel = CancellationToken::new();
    let executor = Arc::new(executor);

    let mut context = ParallelContext::try_create(
        Arc::clone(&executor) as Arc<dyn PartitionRequestExecutor>,
        ranges.clone(),
        config(2),
        None,
    )
    .expect("create");

    let mut delivered = Vec::new();
    delivered.extend(rids(&context.drain(100, &cancel).await.expect("drain")));
    delivered.extend(rids(&context.drain(100, &cancel).await.expect("drain")));
    let token = context
        .continuation_token()
        .expect("token")
        .expect("query not done yet");

    let mut resumed =
        ParallelContext::try_create(executor, ranges, config(2), Some(&token)).expect("resume");
    delivered.extend(drain_to_end(&mut resumed, &cancel).await);

    let mut expected: Vec<String> = items("a", 6)
        .into_iter()
        .chain(items("b", 6))
        .map(|item| item.rid)
        .collect();
    expected.sort();
    delivered.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn throttle_surfaces_one_failed_page_and_resume_is_lossless() {
    let executor = MockExecutor::new();
    executor.set_range("A", items("a", 4), 2);
    executor.set_range("B", items("b", 4), 2);
    let ranges = vec![
        PartitionRange::new("A", "", "7F"),
        PartitionRange::new("B", "7F", "FF"),
    ];
    let cancel = CancellationToken::new();
    let executor = Arc::new(executor);

    let mut context = ParallelContext::try_create(
        Arc::clone(&executor) as Arc<dyn PartitionRequestExecutor>,
        ranges.clone(),
        config(2),
        None,
    )
    .expect("create");

    let mut delivered = Vec::new();
    delivered.extend(rids(&context.drain(100, &cancel).await.expect("drain")));
    delivered.extend(rids(&context.drain(100, &cancel).await.expect("drain")));

    executor.inject(
        "B",
        FetchOutcome::Throttled {
            retry_after: Duration::from_secs(1),
            message: "request rate too large".to_string(),
        },
    );

    let failed = context.drain(100, &cancel).await.expect("drain");
    let failure = failed.failure.expect("throttle surfaces as failed page");
    assert!(failure.is_throttle());
    assert_eq!(failure.retry_after, Some(Duration::from_secs(1)));
    assert!(failed.items.is_empty());

    let token = context
        .continuation_token()
        .expect("token")
        .expect("unfinished ranges keep a token");
    let mut resumed =
        ParallelContext::try_create(executor, ranges, config(2), Some(&token)).expect("resume");
    delivered.extend(drain_to_end(&mut resumed, &cancel).await);

    let mut expected: Vec<String> = items("a", 4)
        .into_iter()
        .chain(items("b", 4))
        .map(|item| item.rid)
        .collect();
    expected.sort();
    delivered.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn split_replaces_parent_with_children() {
    let executor = MockExecutor::new();
    executor.inject(
        "P",
        FetchOutcome::Split {
            child_ranges: vec![
                PartitionRange::new("L", "", "7F"),
                PartitionRange::new("R", "7F", "FF"),
            ],
        },
    );
    executor.set_range("L", items("l", 3), 2);
    executor.set_range("R", items("r", 2), 2);
    let ranges = vec![PartitionRange::new("P", "", "FF")];
    let cancel = CancellationToken::new();

    let mut context =
        ParallelContext::try_create(Arc::new(executor), ranges, config(2), None).expect("create");

    let mut delivered = drain_to_end(&mut context, &cancel).await;
    delivered.sort();
    assert_eq!(delivered, vec!["l0", "l1", "l2", "r0", "r1"]);
    assert!(context.is_done());
}
