//! A producer that follows a script.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use freshbox_core::{Clock, Producer, RefreshResult};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Error returned by [`ScriptedProducer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptedError {
    /// A scripted failure.
    #[error("scripted failure: {0}")]
    Failed(String),
    /// The producer was called more often than scripted.
    #[error("script exhausted on call {0}")]
    Exhausted(usize),
}

#[derive(Debug)]
enum Step<T> {
    /// Timestamps relative to the clock at the moment the value is produced.
    Relative {
        value: T,
        prefetch_in: TimeDelta,
        stale_in: TimeDelta,
    },
    Fixed(RefreshResult<T>),
    Fail(String),
}

#[derive(Debug)]
struct Inner<T> {
    clock: Arc<dyn Clock>,
    steps: Mutex<VecDeque<Step<T>>>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    delay: Mutex<Option<Duration>>,
}

/// Producer returning pre-recorded outcomes in order.
///
/// Clones share the script and the call counters, so a test can hand one
/// clone to the supplier and inspect the other.
///
/// ```
/// use chrono::{TimeDelta, Utc};
/// use freshbox_core::clock::ManualClock;
/// use freshbox_core::Producer;
/// use freshbox_test::ScriptedProducer;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let clock = ManualClock::new(Utc::now());
/// let producer = ScriptedProducer::new(clock.clone());
/// producer
///     .push_value("v1", TimeDelta::seconds(1), TimeDelta::seconds(60))
///     .push_error("unavailable");
///
/// let first = producer.produce().await.unwrap();
/// assert_eq!(first.value(), &"v1");
/// assert!(producer.produce().await.is_err());
/// assert_eq!(producer.calls(), 2);
/// # });
/// ```
#[derive(Debug)]
pub struct ScriptedProducer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ScriptedProducer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ScriptedProducer<T> {
    /// Create an empty script. Relative timestamps are computed from `clock`.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock: Arc::new(clock),
                steps: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                gate: Mutex::new(None),
                delay: Mutex::new(None),
            }),
        }
    }

    /// Next call returns `value`, prefetch-due after `prefetch_in` and stale after `stale_in`.
    pub fn push_value(&self, value: T, prefetch_in: TimeDelta, stale_in: TimeDelta) -> &Self {
        self.inner.steps.lock().push_back(Step::Relative {
            value,
            prefetch_in,
            stale_in,
        });
        self
    }

    /// Next call returns `result` unchanged.
    pub fn push_result(&self, result: RefreshResult<T>) -> &Self {
        self.inner.steps.lock().push_back(Step::Fixed(result));
        self
    }

    /// Next call fails with `message`.
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.inner
            .steps
            .lock()
            .push_back(Step::Fail(message.into()));
        self
    }

    /// Number of calls started.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that returned.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Number of scripted outcomes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.inner.steps.lock().len()
    }

    /// Make every call sleep for `delay` before returning.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.inner.delay.lock() = Some(delay);
        self
    }

    /// Hold subsequent calls until [`release`](Self::release) or [`open`](Self::open).
    pub fn hold(&self) -> &Self {
        *self.inner.gate.lock() = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let one held call proceed.
    pub fn release(&self) {
        if let Some(gate) = self.inner.gate.lock().as_ref() {
            gate.add_permits(1);
        }
    }

    /// Let every held and future call proceed.
    pub fn open(&self) {
        if let Some(gate) = self.inner.gate.lock().take() {
            gate.close();
        }
    }

    /// Wait until at least `calls` calls have started.
    pub async fn wait_for_calls(&self, calls: usize) {
        while self.calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    /// Wait until at least `completed` calls have returned.
    pub async fn wait_for_completed(&self, completed: usize) {
        while self.completed() < completed {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl<T> Producer<T> for ScriptedProducer<T>
where
    T: Send + Sync + 'static,
{
    type Error = ScriptedError;

    async fn produce(&self) -> Result<RefreshResult<T>, ScriptedError> {
        let call = self.inner.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = self.inner.gate.lock().clone();
        if let Some(gate) = gate {
            // A closed gate means the producer was opened.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.inner.steps.lock().pop_front();
        let now = self.inner.clock.now();
        let outcome = match step {
            Some(Step::Relative {
                value,
                prefetch_in,
                stale_in,
            }) => Ok(RefreshResult::new(value, now + stale_in, now + prefetch_in)),
            Some(Step::Fixed(result)) => Ok(result),
            Some(Step::Fail(message)) => Err(ScriptedError::Failed(message)),
            None => Err(ScriptedError::Exhausted(call)),
        };
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}
