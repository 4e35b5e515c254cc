//! Produced values with staleness metadata.
//!
//! A [`RefreshResult`] wraps a value together with two timestamps:
//!
//! - **Prefetch time** - The value is still usable but a refresh should be attempted
//! - **Stale time** - The value must not be served without attempting a refresh first
//!
//! ## Freshness
//!
//! [`RefreshResult::freshness`] evaluates both timestamps against a caller supplied
//! instant and returns:
//!
//! - [`Freshness::Fresh`] - Neither timestamp has passed
//! - [`Freshness::PrefetchDue`] - Prefetch time has passed, stale time has not
//! - [`Freshness::Stale`] - Stale time has passed
//!
//! ```
//! use chrono::{Duration, Utc};
//! use freshbox_core::{Freshness, RefreshResult};
//!
//! let now = Utc::now();
//! let result = RefreshResult::builder("token")
//!     .stale_time(now + Duration::minutes(15))
//!     .prefetch_time(now + Duration::minutes(10))
//!     .build();
//!
//! assert_eq!(result.freshness(now), Freshness::Fresh);
//! assert_eq!(result.freshness(now + Duration::minutes(11)), Freshness::PrefetchDue);
//! assert_eq!(result.freshness(now + Duration::minutes(15)), Freshness::Stale);
//! ```

use chrono::{DateTime, Utc};

/// Freshness of a [`RefreshResult`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Neither prefetch nor stale time has passed.
    Fresh,
    /// Prefetch time has passed; the value is still servable.
    PrefetchDue,
    /// Stale time has passed; a refresh must be attempted before serving.
    Stale,
}

/// A produced value with prefetch and stale timestamps.
///
/// Instances are immutable. Adjusting a timestamp creates a new result via
/// [`with_stale_time`](Self::with_stale_time) or
/// [`with_prefetch_time`](Self::with_prefetch_time), which consume `self`.
///
/// `prefetch_time <= stale_time` is expected but not enforced. When the stale
/// time has passed the result is [`Freshness::Stale`] regardless of its
/// prefetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult<T> {
    value: T,
    stale_time: DateTime<Utc>,
    prefetch_time: DateTime<Utc>,
}

impl<T> RefreshResult<T> {
    /// Creates a result with explicit timestamps.
    pub fn new(value: T, stale_time: DateTime<Utc>, prefetch_time: DateTime<Utc>) -> Self {
        RefreshResult {
            value,
            stale_time,
            prefetch_time,
        }
    }

    /// Creates a builder for a result holding `value`.
    ///
    /// Without explicit timestamps the result never becomes stale.
    pub fn builder(value: T) -> RefreshResultBuilder<T> {
        RefreshResultBuilder {
            value,
            stale_time: None,
            prefetch_time: None,
        }
    }

    /// Returns a reference to the produced value.
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the instant after which the value is stale.
    #[inline]
    pub fn stale_time(&self) -> DateTime<Utc> {
        self.stale_time
    }

    /// Returns the instant after which a refresh should be attempted.
    #[inline]
    pub fn prefetch_time(&self) -> DateTime<Utc> {
        self.prefetch_time
    }

    /// Consumes the result and returns the inner value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether the stale time has passed at `now`.
    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.stale_time
    }

    /// Whether the prefetch time has passed at `now`.
    #[inline]
    pub fn is_prefetch_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.prefetch_time
    }

    /// Classifies this result at `now`.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if self.is_stale(now) {
            Freshness::Stale
        } else if self.is_prefetch_due(now) {
            Freshness::PrefetchDue
        } else {
            Freshness::Fresh
        }
    }

    /// Returns this result with a different stale time.
    pub fn with_stale_time(self, stale_time: DateTime<Utc>) -> Self {
        RefreshResult { stale_time, ..self }
    }

    /// Returns this result with a different prefetch time.
    pub fn with_prefetch_time(self, prefetch_time: DateTime<Utc>) -> Self {
        RefreshResult {
            prefetch_time,
            ..self
        }
    }
}

/// Builder for [`RefreshResult`].
#[derive(Debug)]
pub struct RefreshResultBuilder<T> {
    value: T,
    stale_time: Option<DateTime<Utc>>,
    prefetch_time: Option<DateTime<Utc>>,
}

impl<T> RefreshResultBuilder<T> {
    /// Sets when the value becomes stale.
    pub fn stale_time(self, stale_time: DateTime<Utc>) -> Self {
        Self {
            stale_time: Some(stale_time),
            ..self
        }
    }

    /// Sets when a prefetch should be attempted.
    pub fn prefetch_time(self, prefetch_time: DateTime<Utc>) -> Self {
        Self {
            prefetch_time: Some(prefetch_time),
            ..self
        }
    }

    /// Builds the result.
    ///
    /// An unset stale time means the value never becomes stale. An unset
    /// prefetch time defaults to the stale time.
    pub fn build(self) -> RefreshResult<T> {
        let stale_time = self.stale_time.unwrap_or(DateTime::<Utc>::MAX_UTC);
        RefreshResult {
            value: self.value,
            stale_time,
            prefetch_time: self.prefetch_time.unwrap_or(stale_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder_defaults_never_stale() {
        let result = RefreshResult::builder(1).build();
        assert_eq!(result.stale_time(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(result.prefetch_time(), result.stale_time());
        assert_eq!(result.freshness(Utc::now()), Freshness::Fresh);
    }

    #[test]
    fn test_prefetch_defaults_to_stale_time() {
        let stale = Utc::now() + Duration::seconds(30);
        let result = RefreshResult::builder("v").stale_time(stale).build();
        assert_eq!(result.prefetch_time(), stale);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let now = Utc::now();
        let result = RefreshResult::new("v", now + Duration::seconds(10), now + Duration::seconds(5));

        assert_eq!(result.freshness(now + Duration::seconds(5)), Freshness::PrefetchDue);
        assert_eq!(result.freshness(now + Duration::seconds(10)), Freshness::Stale);
        assert_eq!(
            result.freshness(now + Duration::milliseconds(4999)),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_stale_wins_over_late_prefetch() {
        let now = Utc::now();
        // prefetch after stale is allowed but stale takes precedence
        let result = RefreshResult::new("v", now, now + Duration::seconds(5));
        assert_eq!(result.freshness(now), Freshness::Stale);
    }

    #[test]
    fn test_adjustments_keep_value() {
        let now = Utc::now();
        let result = RefreshResult::new(String::from("v"), now, now);
        let later = now + Duration::seconds(1);

        let extended = result.clone().with_stale_time(later);
        assert_eq!(extended.value(), "v");
        assert_eq!(extended.stale_time(), later);
        assert_eq!(extended.prefetch_time(), now);

        let deferred = result.with_prefetch_time(later);
        assert_eq!(deferred.prefetch_time(), later);
        assert_eq!(deferred.stale_time(), now);
    }
}
