//! Behavioral tests for the single-key coordinator against a recording store.

use std::sync::atomic::{AtomicUsize, Ordering};

use cachet_test_utils::fixtures::{self, json, key};
use cachet_test_utils::{
    logs, CacheOptions, CachetError, InvalidateTiming, NullSentinel, StoreCall,
};

const NS: &str = "profile";

#[tokio::test]
async fn test_get_failure_degrades_to_compute() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), &json(&"cached")).await;
    store.fail_reads(true);
    let (captured, _guard) = logs::capture();

    let value = coordinator
        .read_through(&1u32, &CacheOptions::new(NS), || async {
            Ok::<_, CachetError>(Some("fresh".to_string()))
        })
        .await
        .unwrap();

    assert_eq!(value.as_deref(), Some("fresh"));
    assert_eq!(captured.warnings().len(), 1);
    assert_eq!(store.peek(&key(NS, 1)).await, Some(json(&"fresh")));
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), b"not json").await;
    let (captured, _guard) = logs::capture();

    let value = coordinator
        .read_through(&1u32, &CacheOptions::new(NS), || async {
            Ok::<_, CachetError>(Some(5u32))
        })
        .await
        .unwrap();

    assert_eq!(value, Some(5));
    assert!(captured
        .warnings()
        .iter()
        .any(|m| m.contains("undecodable")));
}

#[tokio::test]
async fn test_undecodable_entry_heals_with_sentinel() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), b"not json").await;
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Option<u32> = coordinator
            .read_through(&1u32, &CacheOptions::new(NS), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CachetError>(None) }
            })
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.peek(&key(NS, 1)).await, Some(NullSentinel::WIRE.to_vec()));
}

#[tokio::test]
async fn test_bypassed_read_overwrites_with_sentinel() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), &json(&"old")).await;

    let value: Option<String> = coordinator
        .read_through(
            &1u32,
            &CacheOptions::new(NS).with_read_directly_from_store(true),
            || async { Ok::<_, CachetError>(None) },
        )
        .await
        .unwrap();

    assert_eq!(value, None);
    assert_eq!(store.peek(&key(NS, 1)).await, Some(NullSentinel::WIRE.to_vec()));
}

#[tokio::test]
async fn test_null_read_uses_add_and_write_uses_set() {
    let (coordinator, store) = fixtures::single();
    let options = CacheOptions::new(NS).with_ttl(30);

    let read: Option<u32> = coordinator
        .read_through(&1u32, &options, || async { Ok::<_, CachetError>(None) })
        .await
        .unwrap();
    let written: Option<u32> = coordinator
        .write_through(&2u32, &options, || async { Ok::<_, CachetError>(None) })
        .await
        .unwrap();

    assert_eq!((read, written), (None, None));
    assert_eq!(
        store.writes(),
        vec![
            StoreCall::Add {
                key: "profile:1".to_string(),
                ttl_seconds: 30,
            },
            StoreCall::Set {
                key: "profile:2".to_string(),
                ttl_seconds: 30,
            },
        ]
    );
    assert_eq!(store.peek(&key(NS, 2)).await, Some(NullSentinel::WIRE.to_vec()));
}

#[tokio::test]
async fn test_invalidate_before_runs_even_if_compute_fails() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), b"1").await;
    let calls = AtomicUsize::new(0);

    let result = coordinator
        .invalidate_around(&1u32, InvalidateTiming::Before, &CacheOptions::new(NS), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CachetError::from(cachet_test_utils::StoreError::transport("db"))) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.peek(&key(NS, 1)).await.is_none());
}

#[tokio::test]
async fn test_failed_delete_is_swallowed() {
    let (coordinator, store) = fixtures::single();
    store.seed(&key(NS, 1), b"1").await;
    store.fail_delete(&key(NS, 1));
    let (captured, _guard) = logs::capture();

    let removed = coordinator
        .invalidate(&1u32, &CacheOptions::new(NS))
        .await
        .unwrap();

    assert!(!removed);
    assert_eq!(captured.warnings().len(), 1);
    assert_eq!(coordinator.stats().write_failures, 1);
}
