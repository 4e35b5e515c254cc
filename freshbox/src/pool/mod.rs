//! Shared pool for background refreshes.
//!
//! The [`NonBlocking`](crate::prefetch::NonBlocking) prefetch strategy runs its
//! refreshes here so that callers never wait on a refresh the cached value does
//! not need yet. One pool is shared by every non-blocking supplier in the
//! process; it is created on first use and released with its last handle.
//!
//! # Example
//!
//! ```ignore
//! use freshbox::pool::PrefetchPool;
//!
//! let pool = PrefetchPool::shared();
//!
//! // Spawn a background refresh tagged with the supplier name
//! pool.spawn("sts-credentials", async {
//!     // Refresh logic here
//! });
//! ```

mod manager;
mod policy;

pub use manager::{PoolTaskKey, PrefetchPool};
pub use policy::{
    DEFAULT_MAX_CONCURRENT_TASKS, PoolConcurrency, PoolConfig, PoolConfigBuilder, TimeoutPolicy,
};
