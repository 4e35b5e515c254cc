use std::time::Duration;

use freshbox::pool::{DEFAULT_MAX_CONCURRENT_TASKS, PoolConcurrency, PoolConfig, PrefetchPool, TimeoutPolicy};
use freshbox::prefetch::{DEFAULT_MIN_PREFETCH_INTERVAL, NonBlocking, PrefetchStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefetch strategy selection.
///
/// ```yaml
/// prefetch:
///   type: NonBlocking
///   name: session-token
///   min_interval: 30s
///   pool:
///     max_concurrent_tasks: 16
///     timeout:
///       Cancel: 10s
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Prefetch {
    /// The first caller to notice refreshes inline.
    #[default]
    OneCallerBlocks,
    /// Refreshes run on the shared background pool.
    NonBlocking(NonBlockingConfig),
}

/// Settings of the non-blocking strategy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NonBlockingConfig {
    /// Name tagging background tasks. Defaults to the supplier name.
    #[serde(default)]
    pub name: Option<String>,
    /// Minimum time between two background prefetches.
    #[serde(default = "default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,
    /// Settings for the shared pool, used only if this supplier creates it.
    #[serde(default)]
    pub pool: Option<Pool>,
}

impl Default for NonBlockingConfig {
    fn default() -> Self {
        Self {
            name: None,
            min_interval: DEFAULT_MIN_PREFETCH_INTERVAL,
            pool: None,
        }
    }
}

fn default_min_interval() -> Duration {
    DEFAULT_MIN_PREFETCH_INTERVAL
}

/// Settings of the shared background pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Pool {
    /// Background refreshes allowed to run at once (1-1024).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: PoolConcurrency,
    /// What to do with background refreshes that run too long.
    #[serde(default)]
    pub timeout: TimeoutPolicy,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            timeout: TimeoutPolicy::None,
        }
    }
}

fn default_max_concurrent_tasks() -> PoolConcurrency {
    DEFAULT_MAX_CONCURRENT_TASKS
}

impl Pool {
    /// Pool configuration for [`PrefetchPool::shared_with`].
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig::builder()
            .max_concurrent_tasks(self.max_concurrent_tasks)
            .timeout_policy(self.timeout)
            .build()
    }
}

impl Prefetch {
    /// Build the strategy for a supplier called `supplier_name`.
    pub fn into_strategy(self, supplier_name: &str) -> Result<PrefetchStrategy, ConfigError> {
        match self {
            Prefetch::OneCallerBlocks => Ok(PrefetchStrategy::one_caller_blocks()),
            Prefetch::NonBlocking(config) => config.into_strategy(supplier_name),
        }
    }
}

impl NonBlockingConfig {
    /// Build a [`NonBlocking`] strategy on the process-wide pool.
    pub fn into_strategy(self, supplier_name: &str) -> Result<PrefetchStrategy, ConfigError> {
        let name = self.name.unwrap_or_else(|| supplier_name.to_string());
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "prefetch.name",
                reason: "must not be empty".to_string(),
            });
        }
        if let TimeoutPolicy::Cancel(timeout) | TimeoutPolicy::Warn(timeout) =
            self.pool.as_ref().map(|pool| pool.timeout).unwrap_or_default()
            && timeout.is_zero()
        {
            return Err(ConfigError::InvalidValue {
                field: "prefetch.pool.timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        let pool = match self.pool {
            Some(pool) => PrefetchPool::shared_with(pool.to_pool_config()),
            None => PrefetchPool::shared(),
        };
        Ok(NonBlocking::with_pool(name, pool)
            .min_interval(self.min_interval)
            .into())
    }
}
