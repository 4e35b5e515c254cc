//! Prefetch strategies.
//!
//! Once a cached value passes its prefetch time, but before it becomes stale,
//! the supplier asks its [`PrefetchStrategy`] to refresh it:
//!
//! - [`OneCallerBlocks`] - one caller runs the refresh inline, everyone else
//!   gets the cached value immediately
//! - [`NonBlocking`] - the refresh runs on the shared
//!   [`PrefetchPool`](crate::pool::PrefetchPool) and no caller waits for it
//!
//! Both variants hold an exclusive "refreshing" flag so that a strategy never
//! starts a second prefetch while one is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

mod non_blocking;
mod one_caller_blocks;

pub use non_blocking::{DEFAULT_MIN_PREFETCH_INTERVAL, NonBlocking};
pub use one_caller_blocks::OneCallerBlocks;

/// How a prefetch-eligible value gets refreshed.
#[derive(Debug)]
pub enum PrefetchStrategy {
    /// The first caller to notice runs the refresh inline.
    OneCallerBlocks(OneCallerBlocks),
    /// The refresh runs in the background on the shared pool.
    NonBlocking(NonBlocking),
}

impl PrefetchStrategy {
    /// Strategy where one caller performs the refresh inline.
    pub fn one_caller_blocks() -> Self {
        PrefetchStrategy::OneCallerBlocks(OneCallerBlocks::new())
    }

    /// Background strategy on the shared pool, tagged with `name`.
    pub fn non_blocking(name: impl Into<smol_str::SmolStr>) -> Self {
        PrefetchStrategy::NonBlocking(NonBlocking::new(name))
    }

    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PrefetchStrategy::OneCallerBlocks(_) => "one_caller_blocks",
            PrefetchStrategy::NonBlocking(_) => "non_blocking",
        }
    }

    /// Start `refresh` according to the strategy.
    ///
    /// Returns `true` if the refresh was run or submitted.
    pub(crate) async fn prefetch(
        &self,
        supplier: &str,
        now: DateTime<Utc>,
        refresh: BoxFuture<'static, ()>,
    ) -> bool {
        match self {
            PrefetchStrategy::OneCallerBlocks(strategy) => strategy.prefetch(supplier, refresh).await,
            PrefetchStrategy::NonBlocking(strategy) => strategy.prefetch(supplier, now, refresh),
        }
    }

    /// Arrange for `trigger` to run after `delay`, replacing any earlier schedule.
    ///
    /// Only the non-blocking strategy refreshes without callers; for
    /// [`OneCallerBlocks`] this is a no-op.
    pub(crate) fn schedule(&self, delay: Duration, trigger: BoxFuture<'static, ()>) {
        match self {
            PrefetchStrategy::OneCallerBlocks(_) => {}
            PrefetchStrategy::NonBlocking(strategy) => strategy.schedule(delay, trigger),
        }
    }

    /// Whether the strategy wants [`schedule`](Self::schedule) calls.
    pub(crate) fn schedules_prefetch(&self) -> bool {
        matches!(self, PrefetchStrategy::NonBlocking(_))
    }

    /// Whether a prefetch started by this strategy is still running.
    pub fn is_refreshing(&self) -> bool {
        match self {
            PrefetchStrategy::OneCallerBlocks(strategy) => strategy.is_refreshing(),
            PrefetchStrategy::NonBlocking(strategy) => strategy.is_refreshing(),
        }
    }

    /// Release background resources. Safe to call more than once.
    pub fn close(&self) {
        match self {
            PrefetchStrategy::OneCallerBlocks(_) => {}
            PrefetchStrategy::NonBlocking(strategy) => strategy.close(),
        }
    }
}

impl Default for PrefetchStrategy {
    fn default() -> Self {
        Self::one_caller_blocks()
    }
}

impl From<OneCallerBlocks> for PrefetchStrategy {
    fn from(strategy: OneCallerBlocks) -> Self {
        PrefetchStrategy::OneCallerBlocks(strategy)
    }
}

impl From<NonBlocking> for PrefetchStrategy {
    fn from(strategy: NonBlocking) -> Self {
        PrefetchStrategy::NonBlocking(strategy)
    }
}

/// Exclusive "a prefetch is running" flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct RefreshingFlag {
    flag: Arc<AtomicBool>,
}

impl RefreshingFlag {
    /// Set the flag if it is clear. The flag is cleared when the guard drops.
    pub(crate) fn try_acquire(&self) -> Option<RefreshingGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshingGuard {
                flag: Arc::clone(&self.flag),
            })
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Clears the owning [`RefreshingFlag`] on drop, including when the refresh
/// future is cancelled.
#[derive(Debug)]
pub(crate) struct RefreshingGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RefreshingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
