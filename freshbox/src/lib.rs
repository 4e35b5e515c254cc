#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Builder for [`CachedSupplier`] and its defaults.
pub mod builder;

/// Error types returned by [`CachedSupplier::get`].
pub mod error;

mod jitter;

/// Metrics collection for supplier observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for:
/// - Producer invocations by outcome, and their duration
/// - Prefetch attempts skipped by a strategy
/// - Background tasks spawned, completed, timed out and rejected by the pool
pub mod metrics;

/// Bounded pool running background refreshes.
///
/// Every [`NonBlocking`](prefetch::NonBlocking) strategy submits to the same
/// process-wide [`PrefetchPool`](pool::PrefetchPool) unless given its own.
pub mod pool;

/// Strategies for refreshing a value before it becomes stale.
pub mod prefetch;

mod supplier;

pub use builder::CachedSupplierBuilder;
pub use error::SupplierError;
pub use prefetch::PrefetchStrategy;
pub use supplier::CachedSupplier;

pub use freshbox_core::{
    Clock, Freshness, Producer, RefreshResult, RefreshResultBuilder, StaleValueBehavior,
    SystemClock,
};

/// The `freshbox` prelude.
pub mod prelude {
    pub use crate::prefetch::{NonBlocking, OneCallerBlocks, PrefetchStrategy};
    pub use crate::{
        CachedSupplier, CachedSupplierBuilder, Clock, Producer, RefreshResult, StaleValueBehavior,
        SupplierError,
    };
}
