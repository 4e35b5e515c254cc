//! YAML configuration for freshbox cached suppliers.
//!
//! ```
//! use freshbox::RefreshResult;
//! use freshbox_configuration::SupplierConfig;
//!
//! let config = SupplierConfig::from_yaml(
//!     r#"
//! name: feature-flags
//! stale_value_behavior: Allow
//! stale_failure_cooldown: 2s
//! "#,
//! )
//! .unwrap();
//!
//! let supplier = config
//!     .into_supplier(|| async { Ok::<_, std::io::Error>(RefreshResult::builder(true).build()) })
//!     .unwrap();
//! assert_eq!(supplier.name(), "feature-flags");
//! ```

pub mod error;
pub mod prefetch;
pub mod supplier;

pub use error::ConfigError;
pub use prefetch::{NonBlockingConfig, Pool, Prefetch};
pub use supplier::SupplierConfig;
