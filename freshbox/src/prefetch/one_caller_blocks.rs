use futures::future::BoxFuture;
use tracing::trace;

use super::RefreshingFlag;
use crate::metrics::record_prefetch_skipped;

/// Prefetch strategy where a single caller refreshes inline.
///
/// The first caller to see a prefetch-eligible value takes the refreshing
/// flag and awaits the refresh itself. Callers arriving while the flag is held
/// return immediately and keep using the cached value.
#[derive(Debug, Default)]
pub struct OneCallerBlocks {
    refreshing: RefreshingFlag,
}

impl OneCallerBlocks {
    /// Create a new strategy.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn prefetch(&self, supplier: &str, refresh: BoxFuture<'static, ()>) -> bool {
        let Some(_guard) = self.refreshing.try_acquire() else {
            trace!(supplier, "Prefetch already running on another caller");
            record_prefetch_skipped(supplier, "in_flight");
            return false;
        };
        refresh.await;
        true
    }

    /// Whether some caller is currently running a prefetch.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.is_set()
    }
}
