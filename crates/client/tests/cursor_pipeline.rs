use std::sync::Arc;

use serde_json::json;

use cpq_client::{
    CancellationToken, PartitionRange, QueryCursor, QueryError, QueryExecutionConfig,
    QueryFeatures, QueryInfo,
};
use cpq_pipeline::testing::MockExecutor;
use cpq_pipeline::{FetchOutcome, PartitionRequestExecutor, QueryFailure, ResultItem};
use cpq_plan::AggregateOperator;

fn config(page_size_hint: usize) -> QueryExecutionConfig {
    QueryExecutionConfig {
        page_size_hint,
        ..Default::default()
    }
}

fn two_ranges() -> Vec<PartitionRange> {
    vec![
        PartitionRange::new("A", "", "7F"),
        PartitionRange::new("B", "7F", "FF"),
    ]
}

fn plain_items(prefix: &str, count: usize) -> Vec<ResultItem> {
    (0..count)
        .map(|i| {
            let rid = format!("{prefix}{i}");
            ResultItem::new(json!({ "id": rid }), rid.clone())
        })
        .collect()
}

/// One partial-count item, shaped the way the rewritten aggregate query
/// projects it: an array with one slot per aggregate operator.
fn count_partial(rid: &str, count: i64) -> ResultItem {
    ResultItem::new(json!([{ "item": count }]), rid)
}

#[tokio::test]
async fn count_is_summed_across_partitions() {
    let executor = MockExecutor::new();
    executor.set_range("A", vec![count_partial("a0", 2), count_partial("a1", 3)], 10);
    executor.set_range("B", vec![count_partial("b0", 5)], 10);

    let plan = QueryInfo {
        aggregates: vec![AggregateOperator::Count],
        has_select_value: true,
        ..Default::default()
    };
    let mut cursor = QueryCursor::try_create(
        &plan,
        &two_ranges(),
        Arc::new(executor),
        config(10),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    let page = cursor.read_next(&cancel).await.expect("read");
    assert!(page.is_success());
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].payload, json!(10));
    assert!(!cursor.has_more_results());
}

#[tokio::test]
async fn offset_and_limit_slice_the_merged_stream() {
    let executor = MockExecutor::new();
    executor.set_range("A", plain_items("a", 8), 10);

    let plan = QueryInfo {
        offset: Some(2),
        limit: Some(3),
        ..Default::default()
    };
    let mut cursor = QueryCursor::try_create(
        &plan,
        &[PartitionRange::new("A", "", "FF")],
        Arc::new(executor),
        config(10),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    let page = cursor.read_next(&cancel).await.expect("read");
    let rids: Vec<&str> = page.items.iter().map(|i| i.rid.as_str()).collect();
    assert_eq!(rids, vec!["a2", "a3", "a4"]);
    assert!(!cursor.has_more_results());
}

#[tokio::test]
async fn distinct_deduplicates_across_partitions() {
    let executor = MockExecutor::new();
    executor.set_range(
        "A",
        vec![
            ResultItem::new(json!({ "city": "Oslo" }), "a0"),
            ResultItem::new(json!({ "city": "Bergen" }), "a1"),
        ],
        10,
    );
    executor.set_range(
        "B",
        vec![
            ResultItem::new(json!({ "city": "Oslo" }), "b0"),
            ResultItem::new(json!({ "city": "Tromso" }), "b1"),
        ],
        10,
    );

    let plan = QueryInfo {
        distinct_type: cpq_plan::DistinctQueryType::Unordered,
        ..Default::default()
    };
    let mut cursor = QueryCursor::try_create(
        &plan,
        &two_ranges(),
        Arc::new(executor),
        config(10),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    let mut cities = Vec::new();
    while cursor.has_more_results() {
        let page = cursor.read_next(&cancel).await.expect("read");
        assert!(page.is_success());
        for item in &page.items {
            cities.push(item.payload["city"].as_str().expect("city").to_string());
        }
    }
    cities.sort();
    assert_eq!(cities, vec!["Bergen", "Oslo", "Tromso"]);
}

#[tokio::test]
async fn group_by_folds_partials_across_partitions() {
    let executor = MockExecutor::new();
    let grouped = |city: &str, count: i64, rid: &str| {
        ResultItem::new(
            json!({
                "groupByItems": [city],
                "payload": { "city": city, "total": count },
            }),
            rid,
        )
    };
    executor.set_range("A", vec![grouped("Oslo", 2, "a0"), grouped("Bergen", 1, "a1")], 10);
    executor.set_range("B", vec![grouped("Oslo", 3, "b0")], 10);

    let mut aliases = std::collections::BTreeMap::new();
    aliases.insert("city".to_string(), None);
    aliases.insert("total".to_string(), Some(AggregateOperator::Count));
    let plan = QueryInfo {
        group_by_expressions: vec!["c.city".to_string()],
        group_by_alias_to_aggregate: aliases,
        ..Default::default()
    };
    let mut cursor = QueryCursor::try_create(
        &plan,
        &two_ranges(),
        Arc::new(executor),
        config(10),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    // A group-by cursor cannot hand out a token before aggregation finishes.
    let error = cursor
        .continuation_token()
        .expect_err("mid-aggregation token");
    assert!(matches!(error, QueryError::ContinuationNotSupported(_)));

    let cancel = CancellationToken::new();
    let page = cursor.read_next(&cancel).await.expect("read");
    assert!(page.is_success());
    let rows: Vec<&serde_json::Value> = page.items.iter().map(|i| &i.payload).collect();
    assert_eq!(
        rows,
        vec![
            &json!({ "city": "Bergen", "total": 1 }),
            &json!({ "city": "Oslo", "total": 5 }),
        ]
    );
    assert!(!cursor.has_more_results());
    assert_eq!(cursor.continuation_token().expect("token"), None);
}

#[tokio::test]
async fn top_truncates_the_stream() {
    let executor = MockExecutor::new();
    executor.set_range("A", plain_items("a", 8), 10);

    let plan = QueryInfo {
        top: Some(2),
        ..Default::default()
    };
    let mut cursor = QueryCursor::try_create(
        &plan,
        &[PartitionRange::new("A", "", "FF")],
        Arc::new(executor),
        config(10),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    let page = cursor.read_next(&cancel).await.expect("read");
    let rids: Vec<&str> = page.items.iter().map(|i| i.rid.as_str()).collect();
    assert_eq!(rids, vec!["a0", "a1"]);
    assert!(!cursor.has_more_results());
}

#[tokio::test]
async fn token_roundtrip_resumes_without_loss_or_duplication() {
    let executor = Arc::new(MockExecutor::new());
    executor.set_range("A", plain_items("a", 6), 2);
    executor.set_range("B", plain_items("b", 6), 2);

    let plan = QueryInfo::default();
    let ranges = two_ranges();
    let cancel = CancellationToken::new();

    let mut cursor = QueryCursor::try_create(
        &plan,
        &ranges,
        Arc::clone(&executor) as Arc<dyn PartitionRequestExecutor>,
        config(2),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let mut delivered: Vec<String> = Vec::new();
    let first = cursor.read_next(&cancel).await.expect("read");
    delivered.extend(first.items.iter().map(|i| i.rid.clone()));
    let token = cursor
        .continuation_token()
        .expect("token")
        .expect("query not done yet");

    let mut resumed = QueryCursor::try_create(
        &plan,
        &ranges,
        Arc::clone(&executor) as Arc<dyn PartitionRequestExecutor>,
        config(2),
        QueryFeatures::ALL,
        Some(&token),
    )
    .expect("resume cursor");
    while resumed.has_more_results() {
        let page = resumed.read_next(&cancel).await.expect("read");
        assert!(page.is_success());
        delivered.extend(page.items.iter().map(|i| i.rid.clone()));
    }

    let mut expected: Vec<String> = plain_items("a", 6)
        .into_iter()
        .chain(plain_items("b", 6))
        .map(|item| item.rid)
        .collect();
    expected.sort();
    delivered.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn unsupported_features_fail_before_execution() {
    let executor = MockExecutor::new();
    let plan = QueryInfo {
        aggregates: vec![AggregateOperator::Count, AggregateOperator::Sum],
        has_select_value: false,
        ..Default::default()
    };

    let error = QueryCursor::try_create(
        &plan,
        &two_ranges(),
        Arc::new(executor),
        config(10),
        QueryFeatures::NONE,
        None,
    )
    .err()
    .expect("plan requires unsupported features");

    match error {
        QueryError::UnsupportedQueryFeatures { missing, message } => {
            assert!(missing.contains(&"NonValueAggregate".to_string()));
            assert!(missing.contains(&"MultipleAggregates".to_string()));
            assert!(message.contains("Upgrade your SDK"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn backend_failure_makes_the_cursor_terminal() {
    let executor = MockExecutor::new();
    executor.set_range("A", plain_items("a", 4), 2);
    executor.inject(
        "A",
        FetchOutcome::Failed(QueryFailure::new(500, 0, "backend unavailable")),
    );

    let plan = QueryInfo::default();
    let mut cursor = QueryCursor::try_create(
        &plan,
        &[PartitionRange::new("A", "", "FF")],
        Arc::new(executor),
        config(2),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    let page = cursor.read_next(&cancel).await.expect("read");
    let failure = page.failure.expect("failed page");
    assert_eq!(failure.status_code, 500);
    assert!(!cursor.has_more_results());

    let error = cursor
        .read_next(&cancel)
        .await
        .expect_err("draining a terminal cursor is a caller bug");
    assert!(matches!(error, QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn cancellation_surfaces_as_an_error_not_a_failed_page() {
    let executor = MockExecutor::new();
    executor.set_range("A", plain_items("a", 4), 2);

    let plan = QueryInfo::default();
    let mut cursor = QueryCursor::try_create(
        &plan,
        &[PartitionRange::new("A", "", "FF")],
        Arc::new(executor),
        config(2),
        QueryFeatures::ALL,
        None,
    )
    .expect("create cursor");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = cursor.read_next(&cancel).await.expect_err("cancelled");
    assert!(matches!(error, QueryError::Cancelled));
    // Cancellation does not poison the cursor; a fresh token drains normally.
    let fresh = CancellationToken::new();
    let page = cursor.read_next(&fresh).await.expect("read after cancel");
    assert!(page.is_success());
    assert_eq!(page.items.len(), 2);
}
