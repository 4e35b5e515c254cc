//! Prefetch pool policies and configuration.

use std::time::Duration;

use bounded_integer::bounded_integer;
use serde::{Deserialize, Serialize};

bounded_integer! {
    /// Number of background refreshes allowed to run at once (1-1024).
    #[repr(u16)]
    pub struct PoolConcurrency { 1..=1024 }
}

/// Default number of concurrent background refreshes.
pub const DEFAULT_MAX_CONCURRENT_TASKS: PoolConcurrency = PoolConcurrency::new_saturating(100);

/// Policy for handling task timeouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// No timeout - task runs until completion.
    #[default]
    None,
    /// Cancel task after specified duration.
    #[serde(with = "humantime_serde")]
    Cancel(Duration),
    /// Log warning after duration but let task continue.
    #[serde(with = "humantime_serde")]
    Warn(Duration),
}

/// Configuration for the shared [`PrefetchPool`](super::PrefetchPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of concurrently running background refreshes.
    /// Tasks submitted above this limit are rejected, not queued.
    pub max_concurrent_tasks: PoolConcurrency,
    /// Timeout policy for spawned tasks.
    pub timeout_policy: TimeoutPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            timeout_policy: TimeoutPolicy::None,
        }
    }
}

impl PoolConfig {
    /// Create a new builder for PoolConfig.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set maximum concurrent tasks.
    pub fn max_concurrent_tasks(mut self, max: PoolConcurrency) -> Self {
        self.config.max_concurrent_tasks = max;
        self
    }

    /// Set timeout policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Set timeout with cancel policy.
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(duration))
    }

    /// Build the PoolConfig.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}
