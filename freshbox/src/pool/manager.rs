//! PrefetchPool implementation for bounded background refreshes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{PoolConfig, TimeoutPolicy};

#[cfg(feature = "metrics")]
use crate::metrics::{
    POOL_TASK_DURATION, POOL_TASKS_ACTIVE, POOL_TASKS_COMPLETED, POOL_TASKS_REJECTED,
    POOL_TASKS_SPAWNED, POOL_TASKS_TIMEOUT,
};

lazy_static! {
    /// Process-wide pool shared by every non-blocking prefetch strategy.
    ///
    /// Only a weak reference is kept here: the pool lives as long as some
    /// strategy or running task holds a [`PrefetchPool`] handle.
    static ref SHARED_POOL: Mutex<Weak<PoolInner>> = Mutex::new(Weak::new());
}

/// Key identifying a task spawned on the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolTaskKey {
    /// Kind of the task, usually the name of the supplier it refreshes.
    pub kind: SmolStr,
    /// Unique identifier within the pool.
    pub id: u64,
}

#[derive(Debug)]
struct PoolInner {
    config: PoolConfig,
    tasks: DashMap<PoolTaskKey, JoinHandle<()>>,
    permits: Arc<Semaphore>,
    key_counter: AtomicU64,
}

/// Bounded executor for background refreshes.
///
/// At most `max_concurrent_tasks` refreshes run at the same time across every
/// supplier using the pool; submissions above that limit are rejected. Tasks
/// run on the ambient tokio runtime, each inside a `supplier.prefetch_task`
/// span tagged with its kind.
#[derive(Clone, Debug)]
pub struct PrefetchPool {
    inner: Arc<PoolInner>,
}

impl PrefetchPool {
    /// Create a private pool with the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(usize::from(config.max_concurrent_tasks.get())));
        Self {
            inner: Arc::new(PoolInner {
                config,
                tasks: DashMap::new(),
                permits,
                key_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Claim the process-wide pool, creating it with default configuration if needed.
    pub fn shared() -> Self {
        Self::shared_with(PoolConfig::default())
    }

    /// Claim the process-wide pool, creating it with `config` if needed.
    ///
    /// The configuration only applies when this call creates the pool. While
    /// another claim is alive the existing pool is returned unchanged.
    pub fn shared_with(config: PoolConfig) -> Self {
        let mut slot = SHARED_POOL.lock();
        if let Some(inner) = slot.upgrade() {
            if inner.config != config {
                debug!(
                    existing = ?inner.config,
                    requested = ?config,
                    "Shared prefetch pool already running, keeping existing configuration"
                );
            }
            return Self { inner };
        }
        let pool = Self::new(config);
        *slot = Arc::downgrade(&pool.inner);
        debug!(config = ?pool.inner.config, "Shared prefetch pool created");
        pool
    }

    /// Whether `self` and `other` are handles to the same pool.
    pub fn same_pool(&self, other: &PrefetchPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this pool, including those held by running tasks.
    pub fn claims(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// The configuration the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn next_key(&self, kind: impl Into<SmolStr>) -> PoolTaskKey {
        let id = self.inner.key_counter.fetch_add(1, Ordering::Relaxed);
        PoolTaskKey {
            kind: kind.into(),
            id,
        }
    }

    /// Spawn a background task tagged with `kind`.
    ///
    /// Returns the task key, or `None` when the task was rejected because the
    /// pool is saturated or no tokio runtime is available. A rejected task is
    /// dropped without being polled.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> Option<PoolTaskKey>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let kind = kind.into();

        let Ok(runtime) = Handle::try_current() else {
            warn!(%kind, "No tokio runtime available, background refresh skipped");
            return None;
        };

        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    %kind,
                    max_concurrent_tasks = self.inner.config.max_concurrent_tasks.get(),
                    "Prefetch pool saturated, background refresh skipped"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!(*POOL_TASKS_REJECTED, "kind" => kind.to_string()).increment(1);
                return None;
            }
        };

        let key = self.next_key(kind);
        let (registered_tx, registered_rx) = oneshot::channel();
        let handle = self.spawn_inner(&runtime, task, key.clone(), permit, registered_rx);
        self.inner.tasks.insert(key.clone(), handle);
        let _ = registered_tx.send(());

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(*POOL_TASKS_SPAWNED, "kind" => key.kind.to_string()).increment(1);
            metrics::gauge!(*POOL_TASKS_ACTIVE, "kind" => key.kind.to_string()).increment(1.0);
        }

        Some(key)
    }

    /// Get the number of currently running tasks.
    pub fn active_task_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|e| !e.value().is_finished())
            .count()
    }

    /// Number of permits currently available for new tasks.
    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Clean up finished task handles.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Cancel a specific task by key.
    ///
    /// The task releases its permit and its entry once the runtime drops it.
    pub fn cancel(&self, key: &PoolTaskKey) -> bool {
        let Some(abort) = self.inner.tasks.get(key).map(|entry| entry.abort_handle()) else {
            return false;
        };
        abort.abort();
        true
    }

    /// Check if a task with the given key is in flight.
    pub fn is_in_flight(&self, key: &PoolTaskKey) -> bool {
        self.inner.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Wait for all currently tracked tasks to complete.
    ///
    /// This polls active tasks until all are finished, with a small yield
    /// between checks to avoid busy-waiting.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();

            if self.inner.tasks.is_empty() {
                break;
            }

            tokio::task::yield_now().await;
        }
    }

    /// Wait for all tasks with a timeout.
    ///
    /// Returns `true` if all tasks completed within the timeout,
    /// `false` if the timeout was reached.
    pub async fn wait_all_timeout(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(
        &self,
        runtime: &Handle,
        task: F,
        key: PoolTaskKey,
        permit: OwnedSemaphorePermit,
        registered: oneshot::Receiver<()>,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_policy = self.inner.config.timeout_policy;
        let slot = TaskSlot {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            _permit: permit,
        };

        let span = info_span!(
            "supplier.prefetch_task",
            supplier = %key.kind,
            task_id = key.id,
        );

        runtime.spawn(
            async move {
                // Dropped on completion or abort, after the handle is tracked.
                let _slot = slot;
                let _ = registered.await;
                let start = Instant::now();
                match timeout_policy {
                    TimeoutPolicy::None => {
                        task.await;
                        #[cfg(feature = "metrics")]
                        Self::record_completion(start, &key.kind);
                    }
                    TimeoutPolicy::Cancel(duration) => {
                        match tokio::time::timeout(duration, task).await {
                            Ok(()) => {
                                #[cfg(feature = "metrics")]
                                Self::record_completion(start, &key.kind);
                            }
                            Err(_) => {
                                warn!(
                                    elapsed_ms = start.elapsed().as_millis(),
                                    "Background refresh cancelled due to timeout"
                                );
                                #[cfg(feature = "metrics")]
                                Self::record_timeout(start, &key.kind);
                            }
                        }
                    }
                    TimeoutPolicy::Warn(duration) => {
                        task.await;
                        let elapsed = start.elapsed();
                        if elapsed > duration {
                            warn!(
                                elapsed_ms = elapsed.as_millis(),
                                threshold_ms = duration.as_millis(),
                                "Background refresh exceeded timeout threshold"
                            );
                        }
                        #[cfg(feature = "metrics")]
                        Self::record_completion(start, &key.kind);
                    }
                }
            }
            .instrument(span),
        )
    }

    #[cfg(feature = "metrics")]
    fn record_completion(start: Instant, kind: &SmolStr) {
        let duration = start.elapsed().as_secs_f64();
        metrics::counter!(*POOL_TASKS_COMPLETED, "kind" => kind.to_string()).increment(1);
        metrics::histogram!(*POOL_TASK_DURATION, "kind" => kind.to_string()).record(duration);
    }

    #[cfg(feature = "metrics")]
    fn record_timeout(start: Instant, kind: &SmolStr) {
        let duration = start.elapsed().as_secs_f64();
        metrics::counter!(*POOL_TASKS_TIMEOUT, "kind" => kind.to_string()).increment(1);
        metrics::histogram!(*POOL_TASK_DURATION, "kind" => kind.to_string()).record(duration);
    }
}

/// A running task's claim on the pool: its permit and its tracking entry.
struct TaskSlot {
    inner: Arc<PoolInner>,
    key: PoolTaskKey,
    _permit: OwnedSemaphorePermit,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.inner.tasks.remove(&self.key);
        #[cfg(feature = "metrics")]
        metrics::gauge!(*POOL_TASKS_ACTIVE, "kind" => self.key.kind.to_string()).decrement(1.0);
    }
}

impl Default for PrefetchPool {
    fn default() -> Self {
        Self::shared()
    }
}
