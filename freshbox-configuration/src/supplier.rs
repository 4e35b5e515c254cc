use std::time::Duration;

use freshbox::builder::{
    DEFAULT_MAX_PREFETCH_JITTER, DEFAULT_STALE_FAILURE_COOLDOWN, DEFAULT_SUPPLIER_NAME,
};
use freshbox::{CachedSupplier, CachedSupplierBuilder, Producer};
use freshbox_core::StaleValueBehavior;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::prefetch::Prefetch;

/// Serializable settings of a [`CachedSupplier`].
///
/// Every field is optional in YAML and falls back to the builder default.
///
/// ```yaml
/// name: session-token
/// stale_value_behavior: Allow
/// jitter_enabled: true
/// max_prefetch_jitter: 30s
/// stale_failure_cooldown: 500ms
/// prefetch:
///   type: NonBlocking
///   min_interval: 1m
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SupplierConfig {
    /// Diagnostic name used in logs, spans and metric labels.
    pub name: String,
    /// What to do when refreshing a stale value fails.
    pub stale_value_behavior: StaleValueBehavior,
    /// How values past their prefetch time get refreshed.
    pub prefetch: Prefetch,
    /// Randomly delay each prefetch time.
    pub jitter_enabled: bool,
    /// Largest random delay added to a prefetch time.
    #[serde(with = "humantime_serde")]
    pub max_prefetch_jitter: Duration,
    /// Delay before a failed or stale-on-arrival value is retried.
    #[serde(with = "humantime_serde")]
    pub stale_failure_cooldown: Duration,
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SUPPLIER_NAME.to_string(),
            stale_value_behavior: StaleValueBehavior::default(),
            prefetch: Prefetch::default(),
            jitter_enabled: true,
            max_prefetch_jitter: DEFAULT_MAX_PREFETCH_JITTER,
            stale_failure_cooldown: DEFAULT_STALE_FAILURE_COOLDOWN,
        }
    }
}

impl SupplierConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_saphyr::from_str(yaml)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.stale_failure_cooldown.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "stale_failure_cooldown",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Apply these settings to `builder`.
    ///
    /// The clock is not configurable from YAML and is left untouched.
    pub fn apply<T, E>(
        self,
        builder: CachedSupplierBuilder<T, E>,
    ) -> Result<CachedSupplierBuilder<T, E>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.validate()?;
        let strategy = self.prefetch.into_strategy(&self.name)?;
        debug!(
            supplier = %self.name,
            prefetch = strategy.kind(),
            stale_value_behavior = ?self.stale_value_behavior,
            "Applying supplier configuration"
        );

        Ok(builder
            .name(self.name)
            .stale_value_behavior(self.stale_value_behavior)
            .prefetch_strategy(strategy)
            .jitter_enabled(self.jitter_enabled)
            .max_prefetch_jitter(self.max_prefetch_jitter)
            .stale_failure_cooldown(self.stale_failure_cooldown))
    }

    /// Build a supplier around `producer` with these settings.
    pub fn into_supplier<T, E, P>(self, producer: P) -> Result<CachedSupplier<T, E>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        P: Producer<T, Error = E> + 'static,
    {
        Ok(self.apply(CachedSupplier::builder(producer))?.build())
    }
}
