//! End-to-end behavior of a cached supplier under concurrent callers.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use freshbox::prefetch::NonBlocking;
use freshbox::pool::{PoolConfig, PrefetchPool};
use freshbox::{CachedSupplier, StaleValueBehavior};
use freshbox_core::clock::ManualClock;
use freshbox_test::{ScriptedError, ScriptedProducer};
use pretty_assertions::assert_eq;

type Supplier = CachedSupplier<String, ScriptedError>;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn setup() -> (ManualClock, ScriptedProducer<String>) {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    (clock, producer)
}

fn supplier(
    clock: &ManualClock,
    producer: &ScriptedProducer<String>,
    behavior: StaleValueBehavior,
) -> Supplier {
    CachedSupplier::builder(producer.clone())
        .name("scenario")
        .clock(clock.clone())
        .stale_value_behavior(behavior)
        .jitter_enabled(false)
        .build()
}

fn secs(seconds: i64) -> TimeDelta {
    TimeDelta::seconds(seconds)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_caller_refreshes_while_others_get_cached_value() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(1), secs(60))
        .push_value("v2".to_string(), secs(1), secs(60));
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Strict);
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(2));
    producer.hold();

    let selected = {
        let supplier = supplier.clone();
        tokio::spawn(async move { supplier.get().await })
    };
    producer.wait_for_calls(2).await;

    let other = tokio::time::timeout(Duration::from_secs(1), supplier.get())
        .await
        .expect("non-selected caller must not wait");
    assert_eq!(other.unwrap(), "v1");

    producer.release();
    assert_eq!(selected.await.unwrap().unwrap(), "v2");
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn test_allow_keeps_serving_first_value_after_failure() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(0), secs(0))
        .push_error("service down");
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Allow);

    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(5));
    assert_eq!(supplier.get().await.unwrap(), "v1");
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_callers_share_one_call() {
    let (clock, producer) = setup();
    producer.push_value("v1".to_string(), secs(30), secs(60));
    producer.hold();
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Strict);

    let callers = (0..50)
        .map(|_| {
            let supplier = supplier.clone();
            tokio::spawn(async move { supplier.get().await })
        })
        .collect::<Vec<_>>();

    producer.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.open();

    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), "v1");
    }
    assert_eq!(producer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failure() {
    let (clock, producer) = setup();
    producer.push_error("boom");
    producer.hold();
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Strict);

    let callers = (0..10)
        .map(|_| {
            let supplier = supplier.clone();
            tokio::spawn(async move { supplier.get().await })
        })
        .collect::<Vec<_>>();

    producer.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.open();

    for caller in callers {
        let error = caller.await.unwrap().unwrap_err();
        assert_eq!(
            error.producer_error(),
            Some(&ScriptedError::Failed("boom".to_string()))
        );
    }
    assert_eq!(producer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_blocking_never_waits_before_stale_time() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(10), secs(60))
        .push_value("v2".to_string(), secs(10), secs(60));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier: Supplier = CachedSupplier::builder(producer.clone())
        .clock(clock.clone())
        .jitter_enabled(false)
        .prefetch_strategy(NonBlocking::with_pool("scenario", pool.clone()))
        .build();
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(30));
    producer.hold();

    for _ in 0..5 {
        let value = tokio::time::timeout(Duration::from_secs(1), supplier.get())
            .await
            .expect("get must not wait for a background prefetch");
        assert_eq!(value.unwrap(), "v1");
    }
    producer.wait_for_calls(2).await;

    producer.open();
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(supplier.get().await.unwrap(), "v2");
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_value_makes_every_caller_wait() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(10), secs(20))
        .push_value("v2".to_string(), secs(10), secs(20));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier: Supplier = CachedSupplier::builder(producer.clone())
        .clock(clock.clone())
        .jitter_enabled(false)
        .prefetch_strategy(NonBlocking::with_pool("scenario", pool))
        .build();
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(20));
    producer.hold();

    let waiting = {
        let supplier = supplier.clone();
        tokio::spawn(async move { supplier.get().await })
    };
    producer.wait_for_calls(2).await;

    let blocked = tokio::time::timeout(Duration::from_millis(50), supplier.get()).await;
    assert!(blocked.is_err(), "stale value must not be served");
    assert!(!waiting.is_finished());

    producer.release();
    assert_eq!(waiting.await.unwrap().unwrap(), "v2");
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn test_strict_returns_refresh_error_for_stale_value() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(10), secs(20))
        .push_error("expired credentials");
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Strict);
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(21));
    let error = supplier.get().await.unwrap_err();

    assert_eq!(
        error.producer_error(),
        Some(&ScriptedError::Failed("expired credentials".to_string()))
    );
    assert_eq!(
        error.to_string(),
        "value producer failed: scripted failure: expired credentials"
    );
}

#[tokio::test]
async fn test_first_fetch_failure_is_fatal_under_allow() {
    let (clock, producer) = setup();
    producer.push_error("no network");
    let supplier = supplier(&clock, &producer, StaleValueBehavior::Allow);

    let error = supplier.get().await.unwrap_err();
    assert_eq!(
        error.producer_error(),
        Some(&ScriptedError::Failed("no network".to_string()))
    );
    assert!(supplier.peek().is_none());
}

#[tokio::test]
async fn test_allow_retries_after_cooldown() {
    let (clock, producer) = setup();
    producer
        .push_value("v1".to_string(), secs(10), secs(20))
        .push_error("flaky")
        .push_value("v2".to_string(), secs(10), secs(20));
    let supplier: Supplier = CachedSupplier::builder(producer.clone())
        .clock(clock.clone())
        .stale_value_behavior(StaleValueBehavior::Allow)
        .stale_failure_cooldown(Duration::from_secs(5))
        .jitter_enabled(false)
        .build();
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(20));
    assert_eq!(supplier.get().await.unwrap(), "v1");

    clock.advance(secs(4));
    assert_eq!(supplier.get().await.unwrap(), "v1");
    assert_eq!(producer.calls(), 2);

    clock.advance(secs(1));
    assert_eq!(supplier.get().await.unwrap(), "v2");
    assert_eq!(producer.calls(), 3);
}
