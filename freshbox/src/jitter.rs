//! Randomised prefetch times.
//!
//! Suppliers created together tend to refresh together. Shifting each
//! prefetch time by a random amount spreads those refreshes out.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Shift `prefetch_time` later by a random amount.
///
/// The shift is below `min(max_jitter, (stale_time - prefetch_time) / 2)`, so
/// the result always stays before `stale_time`. Results whose prefetch time is
/// not before their stale time are returned unchanged.
pub(crate) fn jitter_prefetch_time(
    prefetch_time: DateTime<Utc>,
    stale_time: DateTime<Utc>,
    max_jitter: TimeDelta,
) -> DateTime<Utc> {
    let window = stale_time.signed_duration_since(prefetch_time) / 2;
    let bound_ms = window.min(max_jitter).num_milliseconds();
    if bound_ms <= 0 {
        return prefetch_time;
    }
    let offset = TimeDelta::milliseconds(rand::rng().random_range(0..bound_ms));
    prefetch_time
        .checked_add_signed(offset)
        .unwrap_or(prefetch_time)
}
