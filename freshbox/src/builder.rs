//! Builder for configuring [`CachedSupplier`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use freshbox_core::{Clock, Producer, StaleValueBehavior, SystemClock};
use smol_str::SmolStr;

use crate::prefetch::PrefetchStrategy;
use crate::supplier::CachedSupplier;

/// Name used when none is configured.
pub const DEFAULT_SUPPLIER_NAME: &str = "cached-supplier";

/// Upper bound on the random delay added to prefetch times.
pub const DEFAULT_MAX_PREFETCH_JITTER: Duration = Duration::from_secs(5 * 60);

/// How long a failed refresh of a stale value is retried no sooner than.
pub const DEFAULT_STALE_FAILURE_COOLDOWN: Duration = Duration::from_secs(1);

/// Builder for creating and configuring a [`CachedSupplier`].
///
/// Use [`CachedSupplier::builder`] to create a new builder instance.
///
/// | Setting                  | Default                         |
/// |--------------------------|---------------------------------|
/// | `name`                   | `"cached-supplier"`             |
/// | `clock`                  | [`SystemClock`]                 |
/// | `stale_value_behavior`   | [`StaleValueBehavior::Strict`]  |
/// | `prefetch_strategy`      | [`OneCallerBlocks`](crate::prefetch::OneCallerBlocks) |
/// | `jitter_enabled`         | `true`                          |
/// | `max_prefetch_jitter`    | 5 minutes                       |
/// | `stale_failure_cooldown` | 1 second                        |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use freshbox::{CachedSupplier, RefreshResult, StaleValueBehavior};
/// use freshbox::prefetch::NonBlocking;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let supplier = CachedSupplier::builder(|| async {
///     Ok::<_, std::io::Error>(RefreshResult::builder(42_u32).build())
/// })
/// .name("answer")
/// .stale_value_behavior(StaleValueBehavior::Allow)
/// .prefetch_strategy(NonBlocking::new("answer").min_interval(Duration::from_secs(30)))
/// .max_prefetch_jitter(Duration::from_secs(10))
/// .build();
///
/// assert_eq!(supplier.get().await.unwrap(), 42);
/// # });
/// ```
pub struct CachedSupplierBuilder<T, E>
where
    E: std::error::Error + 'static,
{
    producer: Box<dyn Producer<T, Error = E>>,
    name: SmolStr,
    clock: Arc<dyn Clock>,
    stale_value_behavior: StaleValueBehavior,
    prefetch_strategy: PrefetchStrategy,
    jitter_enabled: bool,
    max_prefetch_jitter: Duration,
    stale_failure_cooldown: Duration,
}

impl<T, E> CachedSupplierBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(producer: Box<dyn Producer<T, Error = E>>) -> Self {
        Self {
            producer,
            name: SmolStr::new_static(DEFAULT_SUPPLIER_NAME),
            clock: Arc::new(SystemClock),
            stale_value_behavior: StaleValueBehavior::default(),
            prefetch_strategy: PrefetchStrategy::default(),
            jitter_enabled: true,
            max_prefetch_jitter: DEFAULT_MAX_PREFETCH_JITTER,
            stale_failure_cooldown: DEFAULT_STALE_FAILURE_COOLDOWN,
        }
    }

    /// Diagnostic name used in logs, spans and metric labels.
    pub fn name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = name.into();
        self
    }

    /// Time source used to judge staleness.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// What to do when refreshing a stale value fails.
    pub fn stale_value_behavior(mut self, behavior: StaleValueBehavior) -> Self {
        self.stale_value_behavior = behavior;
        self
    }

    /// How values past their prefetch time get refreshed.
    pub fn prefetch_strategy(mut self, strategy: impl Into<PrefetchStrategy>) -> Self {
        self.prefetch_strategy = strategy.into();
        self
    }

    /// Randomly delay each prefetch time to spread refreshes of many suppliers.
    pub fn jitter_enabled(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Largest random delay added to a prefetch time.
    pub fn max_prefetch_jitter(mut self, max: Duration) -> Self {
        self.max_prefetch_jitter = max;
        self
    }

    /// Delay before a value is retried after a failed or stale refresh.
    pub fn stale_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.stale_failure_cooldown = cooldown;
        self
    }

    /// Build the supplier. No value is fetched until the first `get()`.
    pub fn build(self) -> CachedSupplier<T, E> {
        let jitter = self
            .jitter_enabled
            .then(|| to_time_delta(self.max_prefetch_jitter))
            .filter(|max| *max > TimeDelta::zero());

        CachedSupplier::from_parts(
            self.name,
            self.producer,
            self.clock,
            self.stale_value_behavior,
            self.prefetch_strategy,
            jitter,
            to_time_delta(self.stale_failure_cooldown),
        )
    }
}

impl<T, E> fmt::Debug for CachedSupplierBuilder<T, E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSupplierBuilder")
            .field("name", &self.name)
            .field("clock", &self.clock)
            .field("stale_value_behavior", &self.stale_value_behavior)
            .field("prefetch_strategy", &self.prefetch_strategy)
            .field("jitter_enabled", &self.jitter_enabled)
            .field("max_prefetch_jitter", &self.max_prefetch_jitter)
            .field("stale_failure_cooldown", &self.stale_failure_cooldown)
            .finish_non_exhaustive()
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
