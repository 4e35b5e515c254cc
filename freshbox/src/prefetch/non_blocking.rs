use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, trace};

use super::RefreshingFlag;
use crate::metrics::record_prefetch_skipped;
use crate::pool::PrefetchPool;

/// Minimum time between two background prefetches of the same supplier.
pub const DEFAULT_MIN_PREFETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Prefetch strategy that refreshes in the background.
///
/// Refreshes run on the shared [`PrefetchPool`], so callers never wait for a
/// value that is not stale yet. At most one background refresh runs per
/// strategy, and a new one starts no sooner than `min_interval` after the
/// previous one started.
///
/// After each successful refresh the supplier schedules a timer that triggers
/// the next prefetch at the value's prefetch time, so the value stays fresh
/// even when nobody calls the supplier.
#[derive(Debug)]
pub struct NonBlocking {
    name: SmolStr,
    min_interval: TimeDelta,
    refreshing: RefreshingFlag,
    last_prefetch: Mutex<Option<DateTime<Utc>>>,
    pool: Mutex<Option<PrefetchPool>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NonBlocking {
    /// Create a strategy on the process-wide shared pool.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self::with_pool(name, PrefetchPool::shared())
    }

    /// Create a strategy on a specific pool.
    pub fn with_pool(name: impl Into<SmolStr>, pool: PrefetchPool) -> Self {
        Self {
            name: name.into(),
            min_interval: to_time_delta(DEFAULT_MIN_PREFETCH_INTERVAL),
            refreshing: RefreshingFlag::default(),
            last_prefetch: Mutex::new(None),
            pool: Mutex::new(Some(pool)),
            timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the minimum interval between two prefetch attempts.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = to_time_delta(interval);
        self
    }

    /// Name used to tag background tasks.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a background refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.is_set()
    }

    /// Whether a proactive prefetch timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The pool this strategy submits to, until closed.
    pub fn pool(&self) -> Option<PrefetchPool> {
        self.pool.lock().clone()
    }

    pub(crate) fn prefetch(
        &self,
        supplier: &str,
        now: DateTime<Utc>,
        refresh: BoxFuture<'static, ()>,
    ) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut last_prefetch = self.last_prefetch.lock();
        if let Some(last) = *last_prefetch
            && now < last.checked_add_signed(self.min_interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
        {
            trace!(supplier, %last, "Prefetch skipped, minimum interval not elapsed");
            record_prefetch_skipped(supplier, "interval");
            return false;
        }

        let Some(guard) = self.refreshing.try_acquire() else {
            trace!(supplier, "Background prefetch already running");
            record_prefetch_skipped(supplier, "in_flight");
            return false;
        };

        let Some(pool) = self.pool.lock().clone() else {
            return false;
        };

        let spawned = pool.spawn(self.name.clone(), async move {
            let _guard = guard;
            refresh.await;
        });

        if spawned.is_some() {
            *last_prefetch = Some(now);
            debug!(supplier, "Background prefetch submitted");
            true
        } else {
            record_prefetch_skipped(supplier, "rejected");
            false
        }
    }

    pub(crate) fn schedule(&self, delay: Duration, trigger: BoxFuture<'static, ()>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!(supplier = %self.name, "No tokio runtime available, prefetch not scheduled");
            return;
        };

        let span = debug_span!("supplier.prefetch_timer", supplier = %self.name, delay_ms = delay.as_millis() as u64);
        let handle = runtime.spawn(
            async move {
                tokio::time::sleep(delay).await;
                trigger.await;
            }
            .instrument(span),
        );

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop scheduling background work and release the pool claim.
    ///
    /// A refresh already running on the pool is left to finish.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.pool.lock().take();
        debug!(supplier = %self.name, "Non-blocking prefetch strategy closed");
    }
}

impl Drop for NonBlocking {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_refresh(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_prefetch_runs_in_background() {
        let pool = PrefetchPool::new(PoolConfig::default());
        let strategy = NonBlocking::with_pool("bg", pool.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(strategy.prefetch("bg", Utc::now(), counting_refresh(&calls)));
        assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!strategy.is_refreshing());
    }

    #[tokio::test]
    async fn test_min_interval_limits_prefetches() {
        let pool = PrefetchPool::new(PoolConfig::default());
        let strategy =
            NonBlocking::with_pool("bg", pool.clone()).min_interval(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        assert!(strategy.prefetch("bg", now, counting_refresh(&calls)));
        assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

        let too_soon = now + TimeDelta::seconds(59);
        assert!(!strategy.prefetch("bg", too_soon, counting_refresh(&calls)));

        let later = now + TimeDelta::seconds(60);
        assert!(strategy.prefetch("bg", later, counting_refresh(&calls)));
        assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_one_background_refresh_at_a_time() {
        let pool = PrefetchPool::new(PoolConfig::default());
        let strategy = NonBlocking::with_pool("bg", pool.clone()).min_interval(Duration::ZERO);
        let release = Arc::new(Notify::new());
        let wait = Arc::clone(&release);

        assert!(strategy.prefetch("bg", Utc::now(), async move { wait.notified().await }.boxed()));
        assert!(!strategy.prefetch("bg", Utc::now(), async {}.boxed()));

        release.notify_one();
        assert!(pool.wait_all_timeout(Duration::from_secs(1)).await);
        assert!(!strategy.is_refreshing());
    }

    #[tokio::test]
    async fn test_close_releases_pool_claim() {
        let pool = PrefetchPool::new(PoolConfig::default());
        let strategy = NonBlocking::with_pool("bg", pool.clone());
        assert_eq!(pool.claims(), 2);

        strategy.close();
        strategy.close();

        assert_eq!(pool.claims(), 1);
        assert!(strategy.pool().is_none());
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(!strategy.prefetch("bg", Utc::now(), counting_refresh(&calls)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let strategy = NonBlocking::with_pool("bg", PrefetchPool::new(PoolConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        strategy.schedule(Duration::from_secs(30), counting_refresh(&calls));
        assert!(strategy.is_scheduled());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let strategy = NonBlocking::with_pool("bg", PrefetchPool::new(PoolConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        strategy.schedule(Duration::from_secs(10), counting_refresh(&calls));
        strategy.schedule(Duration::from_secs(20), counting_refresh(&calls));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        strategy.close();
        assert!(!strategy.is_scheduled());
    }
}
