//! Metrics declaration and initialization.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Refresh metrics

    /// Track number of producer invocations by outcome.
    pub static ref REFRESH_COUNTER: &'static str = {
        metrics::describe_counter!(
            "freshbox_refresh_total",
            "Total number of producer invocations."
        );
        "freshbox_refresh_total"
    };
    /// Histogram of producer invocation duration.
    pub static ref REFRESH_DURATION: &'static str = {
        metrics::describe_histogram!(
            "freshbox_refresh_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of producer invocations in seconds."
        );
        "freshbox_refresh_duration_seconds"
    };
    /// Track number of prefetch attempts that were skipped.
    pub static ref PREFETCH_SKIPPED_COUNTER: &'static str = {
        metrics::describe_counter!(
            "freshbox_prefetch_skipped_total",
            "Total number of prefetch attempts skipped by the prefetch strategy."
        );
        "freshbox_prefetch_skipped_total"
    };

    // Prefetch pool metrics

    /// Track number of pool tasks spawned.
    pub static ref POOL_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "freshbox_pool_tasks_spawned_total",
            "Total number of background refresh tasks spawned."
        );
        "freshbox_pool_tasks_spawned_total"
    };
    /// Track number of pool tasks completed.
    pub static ref POOL_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "freshbox_pool_tasks_completed_total",
            "Total number of background refresh tasks completed."
        );
        "freshbox_pool_tasks_completed_total"
    };
    /// Track number of pool tasks that timed out.
    pub static ref POOL_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "freshbox_pool_tasks_timeout_total",
            "Total number of background refresh tasks that timed out."
        );
        "freshbox_pool_tasks_timeout_total"
    };
    /// Track number of pool tasks rejected because the pool was saturated.
    pub static ref POOL_TASKS_REJECTED: &'static str = {
        metrics::describe_counter!(
            "freshbox_pool_tasks_rejected_total",
            "Total number of background refresh tasks rejected (pool saturated)."
        );
        "freshbox_pool_tasks_rejected_total"
    };
    /// Gauge of currently active pool tasks.
    pub static ref POOL_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "freshbox_pool_tasks_active",
            "Number of currently running background refresh tasks."
        );
        "freshbox_pool_tasks_active"
    };
    /// Histogram of pool task duration.
    pub static ref POOL_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "freshbox_pool_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of background refresh tasks in seconds."
        );
        "freshbox_pool_task_duration_seconds"
    };
}

/// Outcome label of a producer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The producer returned a value.
    Success,
    /// The producer failed and the error was returned to callers.
    Failed,
    /// The producer failed and the cached value was kept.
    Swallowed,
}

impl RefreshOutcome {
    /// Label value used in spans and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Success => "success",
            RefreshOutcome::Failed => "failed",
            RefreshOutcome::Swallowed => "swallowed",
        }
    }
}

/// Record a finished producer invocation.
#[cfg(feature = "metrics")]
pub(crate) fn record_refresh(supplier: &str, outcome: RefreshOutcome, elapsed: std::time::Duration) {
    metrics::counter!(
        *REFRESH_COUNTER,
        "supplier" => supplier.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    metrics::histogram!(*REFRESH_DURATION, "supplier" => supplier.to_string())
        .record(elapsed.as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_refresh(_supplier: &str, _outcome: RefreshOutcome, _elapsed: std::time::Duration) {}

/// Record a prefetch skipped by the strategy.
#[cfg(feature = "metrics")]
pub(crate) fn record_prefetch_skipped(supplier: &str, reason: &'static str) {
    metrics::counter!(
        *PREFETCH_SKIPPED_COUNTER,
        "supplier" => supplier.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_prefetch_skipped(_supplier: &str, _reason: &'static str) {}
