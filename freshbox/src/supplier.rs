//! The self-refreshing cached value supplier.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use freshbox_core::{Clock, Freshness, Producer, RefreshResult, StaleValueBehavior};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{Instrument, Span, debug, debug_span, field, warn};

use crate::builder::CachedSupplierBuilder;
use crate::error::SupplierError;
use crate::jitter::jitter_prefetch_time;
use crate::metrics::{RefreshOutcome, record_refresh};
use crate::prefetch::PrefetchStrategy;

/// Longest delay for which a proactive prefetch timer is armed.
const MAX_SCHEDULE_DELAY: TimeDelta = TimeDelta::days(7);

type BoxProducer<T, E> = Box<dyn Producer<T, Error = E>>;
type RefreshFuture<T, E> = Shared<BoxFuture<'static, Result<T, SupplierError<E>>>>;

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshDemand {
    /// No usable value: the caller waits for the refresh.
    Blocking,
    /// The value is still servable but past its prefetch time.
    Prefetch,
}

impl RefreshDemand {
    fn as_str(&self) -> &'static str {
        match self {
            RefreshDemand::Blocking => "blocking",
            RefreshDemand::Prefetch => "prefetch",
        }
    }
}

struct SupplierState<T, E>
where
    E: std::error::Error + 'static,
{
    current: Option<Arc<RefreshResult<T>>>,
    in_flight: Option<RefreshFuture<T, E>>,
}

struct SupplierInner<T, E>
where
    E: std::error::Error + 'static,
{
    name: SmolStr,
    producer: BoxProducer<T, E>,
    clock: Arc<dyn Clock>,
    stale_value_behavior: StaleValueBehavior,
    prefetch_strategy: PrefetchStrategy,
    jitter: Option<TimeDelta>,
    stale_failure_cooldown: TimeDelta,
    state: Mutex<SupplierState<T, E>>,
    closed: AtomicBool,
}

/// A value that refreshes itself when it becomes stale.
///
/// `get()` returns the cached value while it is fresh. Once the value passes its
/// prefetch time the configured [`PrefetchStrategy`] refreshes it while callers
/// keep being served. Once it passes its stale time every caller waits for a
/// refresh. At most one producer call runs at any time; concurrent callers that
/// need a refresh join the running one and share its result.
///
/// Clones share the same cached value. Dropping the last clone closes the
/// supplier.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use freshbox::{CachedSupplier, RefreshResult};
///
/// #[derive(Debug)]
/// struct TokenError;
/// # impl std::fmt::Display for TokenError {
/// #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("token") }
/// # }
/// # impl std::error::Error for TokenError {}
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let supplier = CachedSupplier::builder(|| async {
///     let now = Utc::now();
///     Ok::<_, TokenError>(
///         RefreshResult::builder(String::from("token"))
///             .stale_time(now + Duration::minutes(15))
///             .prefetch_time(now + Duration::minutes(10))
///             .build(),
///     )
/// })
/// .name("session-token")
/// .build();
///
/// assert_eq!(supplier.get().await.unwrap(), "token");
/// supplier.close();
/// # });
/// ```
pub struct CachedSupplier<T, E>
where
    E: std::error::Error + 'static,
{
    inner: Arc<SupplierInner<T, E>>,
    handles: Arc<AtomicUsize>,
}

impl<T, E> CachedSupplier<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Start building a supplier around `producer`.
    pub fn builder<P>(producer: P) -> CachedSupplierBuilder<T, E>
    where
        P: Producer<T, Error = E> + 'static,
    {
        CachedSupplierBuilder::new(Box::new(producer))
    }

    pub(crate) fn from_parts(
        name: SmolStr,
        producer: BoxProducer<T, E>,
        clock: Arc<dyn Clock>,
        stale_value_behavior: StaleValueBehavior,
        prefetch_strategy: PrefetchStrategy,
        jitter: Option<TimeDelta>,
        stale_failure_cooldown: TimeDelta,
    ) -> Self {
        Self {
            inner: Arc::new(SupplierInner {
                name,
                producer,
                clock,
                stale_value_behavior,
                prefetch_strategy,
                jitter,
                stale_failure_cooldown,
                state: Mutex::new(SupplierState {
                    current: None,
                    in_flight: None,
                }),
                closed: AtomicBool::new(false),
            }),
            handles: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Return the cached value, refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// - [`SupplierError::Producer`] when the producer fails on the first fetch,
    ///   or fails to refresh a stale value under [`StaleValueBehavior::Strict`]
    /// - [`SupplierError::Closed`] after [`close`](Self::close)
    pub async fn get(&self) -> Result<T, SupplierError<E>> {
        let span = debug_span!("freshbox.get", supplier = %self.inner.name);
        Arc::clone(&self.inner).get().instrument(span).await
    }

    /// Release background resources held by the prefetch strategy.
    ///
    /// Safe to call more than once. A refresh that a caller is already
    /// awaiting is not interrupted, but no new refresh starts and later
    /// [`get`](Self::get) calls fail with [`SupplierError::Closed`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Diagnostic name of this supplier.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configured stale value behavior.
    pub fn stale_value_behavior(&self) -> StaleValueBehavior {
        self.inner.stale_value_behavior
    }

    /// Configured prefetch strategy.
    pub fn prefetch_strategy(&self) -> &PrefetchStrategy {
        &self.inner.prefetch_strategy
    }

    /// The currently cached result, without triggering a refresh.
    pub fn peek(&self) -> Option<Arc<RefreshResult<T>>> {
        self.inner.state.lock().current.clone()
    }

    /// Whether a producer call is running right now.
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }
}

impl<T, E> SupplierInner<T, E>
where
    E: std::error::Error + 'static,
{
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> SupplierError<E> {
        SupplierError::Closed {
            name: self.name.clone(),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.prefetch_strategy.close();
        // Callers already awaiting keep their clone of the refresh future.
        self.state.lock().in_flight = None;
        debug!(supplier = %self.name, "Cached supplier closed");
    }
}

impl<T, E> SupplierInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{

    async fn get(self: Arc<Self>) -> Result<T, SupplierError<E>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let now = self.clock.now();
        let current = self.state.lock().current.clone();
        let Some(current) = current else {
            debug!("No cached value, fetching");
            return self.refresh(RefreshDemand::Blocking).await;
        };

        match current.freshness(now) {
            Freshness::Fresh => Ok(current.value().clone()),
            Freshness::Stale => {
                debug!(stale_time = %current.stale_time(), "Cached value is stale, refreshing");
                self.refresh(RefreshDemand::Blocking).await
            }
            Freshness::PrefetchDue => {
                let failure = self.prefetch(now).await;
                let latest = self.state.lock().current.clone().unwrap_or(current);
                // An inline refresh may have outlived the stale time.
                if latest.is_stale(self.clock.now()) {
                    if let Some(error) = failure {
                        return Err(error);
                    }
                    return self.refresh(RefreshDemand::Blocking).await;
                }
                Ok(latest.value().clone())
            }
        }
    }

    /// Hand a refresh to the prefetch strategy.
    ///
    /// Returns the refresh error when the strategy ran the refresh inline and
    /// it failed.
    async fn prefetch(self: &Arc<Self>, now: DateTime<Utc>) -> Option<SupplierError<E>> {
        let failure = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(self);
        let slot = Arc::clone(&failure);
        let refresh = async move {
            if let Some(inner) = weak.upgrade()
                && let Err(error) = inner.refresh(RefreshDemand::Prefetch).await
            {
                *slot.lock() = Some(error);
            }
        }
        .boxed();
        self.prefetch_strategy
            .prefetch(&self.name, now, refresh)
            .await;
        failure.lock().take()
    }

    /// Run or join the single in-flight refresh.
    async fn refresh(self: &Arc<Self>, demand: RefreshDemand) -> Result<T, SupplierError<E>> {
        let refresh = {
            let mut state = self.state.lock();
            if let Some(in_flight) = state.in_flight.clone() {
                in_flight
            } else {
                if self.is_closed() {
                    return Err(self.closed_error());
                }
                // Another caller may have refreshed while this one waited for the lock.
                if let Some(current) = &state.current {
                    let now = self.clock.now();
                    let needed = match demand {
                        RefreshDemand::Blocking => current.is_stale(now),
                        RefreshDemand::Prefetch => current.is_prefetch_due(now),
                    };
                    if !needed {
                        return Ok(current.value().clone());
                    }
                }
                let refresh = Self::start_refresh(Arc::downgrade(self), self.name.clone(), demand);
                state.in_flight = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    fn start_refresh(
        inner: Weak<Self>,
        name: SmolStr,
        demand: RefreshDemand,
    ) -> RefreshFuture<T, E> {
        async move {
            match inner.upgrade() {
                Some(inner) => inner.run_refresh(demand).await,
                None => Err(SupplierError::Closed { name }),
            }
        }
        .boxed()
        .shared()
    }

    async fn run_refresh(self: &Arc<Self>, demand: RefreshDemand) -> Result<T, SupplierError<E>> {
        let span = debug_span!(
            "supplier.refresh",
            supplier = %self.name,
            demand = demand.as_str(),
            outcome = field::Empty,
        );

        async {
            let start = Instant::now();
            let produced = self.producer.produce().await;
            let now = self.clock.now();

            let (result, outcome, accepted) = {
                let mut state = self.state.lock();
                state.in_flight = None;
                match produced {
                    Ok(fresh) => {
                        let accepted = Arc::new(self.accept(fresh, now));
                        state.current = Some(Arc::clone(&accepted));
                        (
                            Ok(accepted.value().clone()),
                            RefreshOutcome::Success,
                            Some(accepted),
                        )
                    }
                    Err(error) => {
                        let (result, outcome) = self.resolve_failure(&mut state, Arc::new(error), now);
                        (result, outcome, None)
                    }
                }
            };

            Span::current().record("outcome", outcome.as_str());
            record_refresh(&self.name, outcome, start.elapsed());

            if let Some(accepted) = accepted {
                debug!(
                    stale_time = %accepted.stale_time(),
                    prefetch_time = %accepted.prefetch_time(),
                    "Cached value refreshed"
                );
                self.schedule_prefetch(&accepted, now);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Adjust a freshly produced result before caching it.
    fn accept(&self, fresh: RefreshResult<T>, now: DateTime<Utc>) -> RefreshResult<T> {
        if fresh.is_stale(now) {
            let retry_at = saturating_add(now, self.stale_failure_cooldown);
            warn!(
                supplier = %self.name,
                stale_time = %fresh.stale_time(),
                retry_at = %retry_at,
                "Produced value is already stale, serving it until the next attempt"
            );
            return fresh.with_stale_time(retry_at).with_prefetch_time(retry_at);
        }

        match self.jitter {
            Some(max_jitter) => {
                let prefetch_time =
                    jitter_prefetch_time(fresh.prefetch_time(), fresh.stale_time(), max_jitter);
                fresh.with_prefetch_time(prefetch_time)
            }
            None => fresh,
        }
    }

    /// Decide whether a producer failure reaches the callers.
    fn resolve_failure(
        &self,
        state: &mut SupplierState<T, E>,
        error: Arc<E>,
        now: DateTime<Utc>,
    ) -> (Result<T, SupplierError<E>>, RefreshOutcome) {
        let Some(current) = state.current.clone() else {
            warn!(supplier = %self.name, error = %error, "Initial fetch failed");
            return (Err(SupplierError::Producer(error)), RefreshOutcome::Failed);
        };

        if !current.is_stale(now) {
            let retry_at = saturating_add(now, self.stale_failure_cooldown).min(current.stale_time());
            warn!(
                supplier = %self.name,
                error = %error,
                retry_at = %retry_at,
                "Prefetch failed, keeping cached value"
            );
            state.current = Some(Arc::new(
                RefreshResult::clone(&current).with_prefetch_time(retry_at),
            ));
            return (Ok(current.value().clone()), RefreshOutcome::Swallowed);
        }

        match self.stale_value_behavior {
            StaleValueBehavior::Strict => {
                warn!(
                    supplier = %self.name,
                    error = %error,
                    stale_time = %current.stale_time(),
                    "Refresh of stale value failed"
                );
                (Err(SupplierError::Producer(error)), RefreshOutcome::Failed)
            }
            StaleValueBehavior::Allow => {
                let retry_at = saturating_add(now, self.stale_failure_cooldown);
                warn!(
                    supplier = %self.name,
                    error = %error,
                    stale_time = %current.stale_time(),
                    retry_at = %retry_at,
                    "Refresh of stale value failed, serving stale value until the next attempt"
                );
                state.current = Some(Arc::new(
                    RefreshResult::clone(&current)
                        .with_stale_time(retry_at)
                        .with_prefetch_time(retry_at),
                ));
                (Ok(current.value().clone()), RefreshOutcome::Swallowed)
            }
        }
    }

    /// Arm the strategy's timer for the next prefetch of `accepted`.
    fn schedule_prefetch(self: &Arc<Self>, accepted: &RefreshResult<T>, now: DateTime<Utc>) {
        if !self.prefetch_strategy.schedules_prefetch() || self.is_closed() {
            return;
        }

        let until = accepted.prefetch_time().signed_duration_since(now);
        if until <= TimeDelta::zero() || until > MAX_SCHEDULE_DELAY {
            debug!(
                prefetch_time = %accepted.prefetch_time(),
                "Prefetch time out of scheduling range, not scheduled"
            );
            return;
        }
        let Ok(delay) = until.to_std() else {
            return;
        };

        let weak = Arc::downgrade(self);
        let trigger = async move {
            if let Some(inner) = weak.upgrade() {
                inner.prefetch_if_due().await;
            }
        }
        .boxed();
        self.prefetch_strategy.schedule(delay, trigger);
    }

    async fn prefetch_if_due(self: Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let now = self.clock.now();
        let due = self
            .state
            .lock()
            .current
            .as_ref()
            .is_some_and(|current| current.is_prefetch_due(now));
        if due {
            // Background failures are logged inside the refresh.
            let _ = self.prefetch(now).await;
        }
    }
}

fn saturating_add(time: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    time.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<T, E> Clone for CachedSupplier<T, E>
where
    E: std::error::Error + 'static,
{
    fn clone(&self) -> Self {
        self.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
            handles: Arc::clone(&self.handles),
        }
    }
}

impl<T, E> Drop for CachedSupplier<T, E>
where
    E: std::error::Error + 'static,
{
    fn drop(&mut self) {
        // Timers and in-flight refreshes only hold weak references.
        if self.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.close();
        }
    }
}

impl<T, E> fmt::Debug for CachedSupplier<T, E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.try_lock();
        f.debug_struct("CachedSupplier")
            .field("name", &self.inner.name)
            .field("stale_value_behavior", &self.inner.stale_value_behavior)
            .field("prefetch_strategy", &self.inner.prefetch_strategy.kind())
            .field("clock", &self.inner.clock)
            .field(
                "stale_time",
                &state
                    .as_ref()
                    .and_then(|s| s.current.as_ref().map(|c| c.stale_time())),
            )
            .field("refreshing", &state.as_ref().map(|s| s.in_flight.is_some()))
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}
