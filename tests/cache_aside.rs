// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-aside reads and write-through saves against a scripted remote.
//!
//! Run with: `cargo test --test cache_aside`

mod support;

use std::sync::Arc;

use serde_json::json;

use mirror_sync::query::{FilterOperator, SortDirection};
use mirror_sync::{
    CacheAsideService, ChangeOp, CircuitConfig, FetchOptions, LocalStore, MirrorError, PageSource,
    QueryDescriptor, ReadMode, Record, StoreProvider,
};

use support::{config, init_tracing, memory_provider, order, orders, MockRemote};

fn service_with(remote: &Arc<MockRemote>) -> (CacheAsideService, Arc<StoreProvider>) {
    init_tracing();
    let provider = memory_provider();
    let service = CacheAsideService::new(provider.clone(), remote.clone(), &config());
    (service, provider)
}

async fn store(provider: &StoreProvider) -> Arc<dyn LocalStore> {
    provider.get().await.unwrap()
}

#[tokio::test]
async fn happy_miss_populates_then_hits() {
    let remote = MockRemote::new();
    remote.set_rows("orders", orders(30));
    let (service, provider) = service_with(&remote);

    let page = service
        .fetch_page("orders", &QueryDescriptor::rows(0, 10))
        .await
        .unwrap();
    assert_eq!(page.source, PageSource::Remote);
    assert_eq!(page.len(), 10);
    assert_eq!(page.total, 30);
    assert_eq!(
        store(&provider).await.count("orders", ReadMode::ActiveOnly).await.unwrap(),
        10
    );

    let page = service
        .fetch_page("orders", &QueryDescriptor::rows(0, 10))
        .await
        .unwrap();
    assert_eq!(page.source, PageSource::Cache);
    assert_eq!(remote.list_count(), 1);
}

#[tokio::test]
async fn happy_cache_hit_filters_sorts_then_slices() {
    let remote = MockRemote::new();
    remote.set_rows("orders", orders(30));
    let (service, _provider) = service_with(&remote);
    service.refresh_all("orders").await.unwrap();

    let descriptor = QueryDescriptor::rows(0, 5)
        .filter("status", FilterOperator::Equals, json!("open"))
        .sort_by("amount", SortDirection::Desc);
    let page = service.fetch_page("orders", &descriptor).await.unwrap();

    assert_eq!(page.source, PageSource::Cache);
    // Total counts the filtered set, not the table
    assert_eq!(page.total, 15);
    let amounts: Vec<_> = page.rows.iter().map(|r| r.field("amount").cloned()).collect();
    assert_eq!(
        amounts,
        vec![Some(json!(28)), Some(json!(26)), Some(json!(24)), Some(json!(22)), Some(json!(20))]
    );
}

#[tokio::test]
async fn happy_consecutive_windows_do_not_overlap() {
    let remote = MockRemote::new();
    remote.set_rows("orders", orders(25));
    let (service, _provider) = service_with(&remote);
    service.refresh_all("orders").await.unwrap();

    let mut seen = Vec::new();
    for start in (0..25).step_by(10) {
        let descriptor =
            QueryDescriptor::rows(start, start + 10).sort_by("amount", SortDirection::Asc);
        let page = service.fetch_page("orders", &descriptor).await.unwrap();
        assert!(page.len() <= 10);
        assert_eq!(page.total, 25);
        seen.extend(page.rows.into_iter().map(|r| r.id));
    }

    let expected: Vec<_> = orders(25).into_iter().map(|r| r.id).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn happy_missing_values_sort_last_both_ways() {
    let remote = MockRemote::new();
    let (service, _provider) = service_with(&remote);
    for (id, amount) in [("a", json!(3)), ("b", json!(null)), ("c", json!(1))] {
        service.save("orders", order(id, "open", amount)).await.unwrap();
    }
    service
        .save("orders", Record::from_json("d".into(), json!({"status": "open"})))
        .await
        .unwrap();

    for (direction, expected) in [
        (SortDirection::Asc, ["c", "a"]),
        (SortDirection::Desc, ["a", "c"]),
    ] {
        let page = service
            .fetch_page("orders", &QueryDescriptor::rows(0, 10).sort_by("amount", direction))
            .await
            .unwrap();
        let ids: Vec<_> = page.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(&ids[..2], &expected[..]);
        assert!(ids[2..].contains(&"b") && ids[2..].contains(&"d"));
    }
}

#[tokio::test]
async fn happy_save_then_fetch_round_trip() {
    let remote = MockRemote::new();
    remote.set_offline(true);
    let (service, provider) = service_with(&remote);

    let saved = service
        .save("orders", order("o-new", "draft", json!(12.5)))
        .await
        .unwrap();
    let fetched = service.fetch_by_id("orders", "o-new").await.unwrap().unwrap();
    assert_eq!(fetched, saved);
    assert_eq!(remote.get_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let staged = store(&provider).await.staged(10).await.unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].op, ChangeOp::Create);
    assert_eq!(staged[0].payload.as_ref(), Some(&saved));
}

#[tokio::test]
async fn happy_fetch_by_id_cached_after_remote_goes_away() {
    let remote = MockRemote::new();
    remote.set_rows("orders", orders(3));
    let (service, _provider) = service_with(&remote);

    let first = service.fetch_by_id("orders", "o001").await.unwrap().unwrap();
    remote.set_offline(true);
    let second = service.fetch_by_id("orders", "o001").await.unwrap().unwrap();
    assert_eq!(first, second);

    let err = service.fetch_by_id("orders", "o002").await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test]
async fn happy_remote_not_found_is_none() {
    let remote = MockRemote::new();
    let (service, _provider) = service_with(&remote);
    assert!(service.fetch_by_id("orders", "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn happy_delete_hides_row_and_stages() {
    let remote = MockRemote::new();
    let (service, provider) = service_with(&remote);
    service.save("orders", order("x", "open", json!(1))).await.unwrap();

    assert!(service.delete("orders", "x").await.unwrap());
    assert!(!service.delete("orders", "x").await.unwrap());

    let repo = service.repository("orders");
    assert!(repo.get("x").await.unwrap().is_none());
    assert!(!repo.get_including_inactive("x").await.unwrap().unwrap().is_active);

    let page = service
        .fetch_page_with("orders", &QueryDescriptor::rows(0, 10), FetchOptions::cache_first())
        .await
        .unwrap();
    // Table now holds only an inactive row, so this is a remote miss
    assert_eq!(page.source, PageSource::Remote);
    assert!(page.is_empty());

    let ops: Vec<_> = store(&provider)
        .await
        .staged(10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.op)
        .collect();
    assert_eq!(ops, vec![ChangeOp::Create, ChangeOp::Delete]);
}

#[tokio::test]
async fn happy_refresh_all_replaces_table() {
    let remote = MockRemote::new();
    remote.set_rows("orders", orders(23));
    let (service, provider) = service_with(&remote);
    service.save("orders", order("local-only", "open", json!(0))).await.unwrap();

    assert_eq!(service.refresh_all("orders").await.unwrap(), 23);
    assert_eq!(remote.list_count(), 3);

    let store = store(&provider).await;
    assert_eq!(store.count("orders", ReadMode::ActiveOnly).await.unwrap(), 23);
    assert!(store
        .get("orders", "local-only", ReadMode::IncludeInactive)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failure_invalid_descriptor_is_fatal() {
    let remote = MockRemote::new();
    let (service, _provider) = service_with(&remote);

    let bad_value = QueryDescriptor::rows(0, 10).filter("amount", FilterOperator::Between, json!(5));
    let err = service.fetch_page("orders", &bad_value).await.unwrap_err();
    assert!(matches!(err, MirrorError::Validation(_)));

    let bad_window = QueryDescriptor::rows(20, 10);
    let err = service.fetch_page("orders", &bad_window).await.unwrap_err();
    assert!(matches!(err, MirrorError::Validation(_)));
    assert_eq!(remote.list_count(), 0);
}

#[tokio::test]
async fn failure_open_circuit_still_serves_the_mirror() {
    let remote = MockRemote::new();
    remote.set_offline(true);
    init_tracing();
    let provider = memory_provider();
    let circuit = CircuitConfig {
        failure_rate: 0.5,
        window: 2,
        half_open_calls: 1,
        recovery_timeout: std::time::Duration::from_secs(60),
    };
    let service = CacheAsideService::with_circuit(provider, remote.clone(), &config(), circuit);

    for _ in 0..5 {
        let page = service
            .fetch_page("orders", &QueryDescriptor::rows(0, 10))
            .await
            .unwrap();
        assert_eq!(page.source, PageSource::OfflineFallback);
    }

    assert!(service.circuit().rejections() >= 1);
    assert!(remote.list_count() < 5);
}
