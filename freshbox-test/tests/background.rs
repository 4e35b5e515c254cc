//! Background refreshes of the non-blocking strategy and the shared pool.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use freshbox::pool::{PoolConcurrency, PoolConfig, PrefetchPool};
use freshbox::prefetch::NonBlocking;
use freshbox::CachedSupplier;
use freshbox_core::clock::ManualClock;
use freshbox_test::{ScriptedError, ScriptedProducer};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn non_blocking_supplier(
    name: &str,
    clock: &ManualClock,
    producer: &ScriptedProducer<u32>,
    pool: &PrefetchPool,
) -> CachedSupplier<u32, ScriptedError> {
    CachedSupplier::builder(producer.clone())
        .name(name)
        .clock(clock.clone())
        .jitter_enabled(false)
        .prefetch_strategy(NonBlocking::with_pool(name, pool.clone()))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_value_is_refreshed_without_callers() {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    producer
        .push_value(1, TimeDelta::seconds(10), TimeDelta::seconds(60))
        .push_value(2, TimeDelta::seconds(10), TimeDelta::seconds(60));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier = non_blocking_supplier("proactive", &clock, &producer, &pool);

    assert_eq!(supplier.get().await.unwrap(), 1);
    match supplier.prefetch_strategy() {
        freshbox::PrefetchStrategy::NonBlocking(strategy) => assert!(strategy.is_scheduled()),
        other => panic!("unexpected strategy {other:?}"),
    }

    clock.advance(TimeDelta::seconds(10));
    tokio::time::sleep(Duration::from_secs(11)).await;
    producer.wait_for_completed(2).await;
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

    assert_eq!(supplier.peek().unwrap().value(), &2);
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timer_skips_value_that_is_not_due() {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    producer.push_value(1, TimeDelta::seconds(10), TimeDelta::seconds(60));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier = non_blocking_supplier("not-due", &clock, &producer, &pool);

    assert_eq!(supplier.get().await.unwrap(), 1);

    // The timer fires, but the clock says the value is still fresh.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

    assert_eq!(producer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_far_prefetch_time_is_not_scheduled() {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    producer.push_value(1, TimeDelta::days(30), TimeDelta::days(31));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier = non_blocking_supplier("far", &clock, &producer, &pool);

    assert_eq!(supplier.get().await.unwrap(), 1);
    match supplier.prefetch_strategy() {
        freshbox::PrefetchStrategy::NonBlocking(strategy) => assert!(!strategy.is_scheduled()),
        other => panic!("unexpected strategy {other:?}"),
    }
}

#[tokio::test]
async fn test_saturated_pool_rejects_prefetch() {
    let clock = ManualClock::new(start());
    let pool = PrefetchPool::new(
        PoolConfig::builder()
            .max_concurrent_tasks(PoolConcurrency::new(1).unwrap())
            .build(),
    );

    let first_producer = ScriptedProducer::new(clock.clone());
    first_producer
        .push_value(1, TimeDelta::seconds(10), TimeDelta::seconds(60))
        .push_value(2, TimeDelta::seconds(10), TimeDelta::seconds(60));
    let first = non_blocking_supplier("first", &clock, &first_producer, &pool);

    let second_producer = ScriptedProducer::new(clock.clone());
    second_producer
        .push_value(10, TimeDelta::seconds(10), TimeDelta::seconds(60))
        .push_value(20, TimeDelta::seconds(10), TimeDelta::seconds(60));
    let second = non_blocking_supplier("second", &clock, &second_producer, &pool);

    assert_eq!(first.get().await.unwrap(), 1);
    assert_eq!(second.get().await.unwrap(), 10);

    clock.advance(TimeDelta::seconds(15));
    first_producer.hold();

    // Occupies the only permit.
    assert_eq!(first.get().await.unwrap(), 1);
    first_producer.wait_for_calls(2).await;
    assert_eq!(pool.available_permits(), 0);

    // Rejected: served from cache, producer untouched.
    assert_eq!(second.get().await.unwrap(), 10);
    assert_eq!(second_producer.calls(), 1);

    first_producer.open();
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

    // A rejected prefetch does not count against the minimum interval.
    assert_eq!(second.get().await.unwrap(), 10);
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(second.get().await.unwrap(), 20);
    assert_eq!(second_producer.calls(), 2);
}

#[tokio::test]
async fn test_min_interval_limits_background_refreshes() {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    producer
        .push_value(1, TimeDelta::seconds(1), TimeDelta::seconds(600))
        .push_value(2, TimeDelta::seconds(1), TimeDelta::seconds(600))
        .push_value(3, TimeDelta::seconds(1), TimeDelta::seconds(600));
    let pool = PrefetchPool::new(PoolConfig::default());
    let supplier = CachedSupplier::builder(producer.clone())
        .clock(clock.clone())
        .jitter_enabled(false)
        .prefetch_strategy(
            NonBlocking::with_pool("interval", pool.clone()).min_interval(Duration::from_secs(30)),
        )
        .build();
    assert_eq!(supplier.get().await.unwrap(), 1);

    clock.advance(TimeDelta::seconds(2));
    assert_eq!(supplier.get().await.unwrap(), 1);
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(producer.calls(), 2);

    // Due again, but inside the interval.
    clock.advance(TimeDelta::seconds(2));
    assert_eq!(supplier.get().await.unwrap(), 2);
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(producer.calls(), 2);

    clock.advance(TimeDelta::seconds(30));
    assert_eq!(supplier.get().await.unwrap(), 2);
    assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(supplier.get().await.unwrap(), 3);
    assert_eq!(producer.calls(), 3);
}

#[tokio::test]
async fn test_suppliers_share_the_process_pool() {
    let clock = ManualClock::new(start());
    let producer = ScriptedProducer::new(clock.clone());
    let first: CachedSupplier<u32, ScriptedError> = CachedSupplier::builder(producer.clone())
        .prefetch_strategy(NonBlocking::new("shared-a"))
        .build();
    let second: CachedSupplier<u32, ScriptedError> = CachedSupplier::builder(producer)
        .prefetch_strategy(NonBlocking::new("shared-b"))
        .build();

    let pool_of = |supplier: &CachedSupplier<u32, ScriptedError>| match supplier.prefetch_strategy() {
        freshbox::PrefetchStrategy::NonBlocking(strategy) => strategy.pool().unwrap(),
        other => panic!("unexpected strategy {other:?}"),
    };
    assert!(pool_of(&first).same_pool(&pool_of(&second)));

    first.close();
    assert!(pool_of(&second).same_pool(&PrefetchPool::shared()));
}
