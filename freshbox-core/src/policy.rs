//! Stale value policy.
//!
//! [`StaleValueBehavior`] decides what a cached supplier does when a refresh
//! of an already stale value fails.

use serde::{Deserialize, Serialize};

/// Behavior when refreshing a stale value fails.
///
/// Only applies when a previous value exists. A failure on the very first
/// fetch is always returned to the caller.
///
/// # Example
///
/// ```
/// use freshbox_core::StaleValueBehavior;
///
/// assert_eq!(StaleValueBehavior::default(), StaleValueBehavior::Strict);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum StaleValueBehavior {
    /// Return the refresh error to every waiting caller.
    #[default]
    Strict,
    /// Swallow the error and keep serving the stale value for a short cool-down.
    Allow,
}
