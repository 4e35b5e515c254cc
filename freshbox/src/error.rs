use std::sync::Arc;

use smol_str::SmolStr;
use thiserror::Error;

/// Error returned by [`CachedSupplier::get`](crate::CachedSupplier::get).
///
/// Every caller joined on the same failed refresh receives a clone of the
/// same error; the producer error itself is shared through an [`Arc`].
#[derive(Debug, Error)]
pub enum SupplierError<E>
where
    E: std::error::Error + 'static,
{
    /// The producer failed and no usable cached value exists.
    ///
    /// Returned on a failed first fetch, or when refreshing a stale value
    /// fails under [`StaleValueBehavior::Strict`](crate::StaleValueBehavior::Strict).
    #[error("value producer failed: {0}")]
    Producer(#[source] Arc<E>),

    /// The supplier was closed before or during the call.
    #[error("cached supplier `{name}` is closed")]
    Closed {
        /// Name of the closed supplier.
        name: SmolStr,
    },
}

impl<E> SupplierError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the producer error, if this error came from the producer.
    pub fn producer_error(&self) -> Option<&E> {
        match self {
            SupplierError::Producer(error) => Some(error.as_ref()),
            SupplierError::Closed { .. } => None,
        }
    }

    /// Whether this error was caused by calling a closed supplier.
    pub fn is_closed(&self) -> bool {
        matches!(self, SupplierError::Closed { .. })
    }
}

impl<E> Clone for SupplierError<E>
where
    E: std::error::Error + 'static,
{
    fn clone(&self) -> Self {
        match self {
            SupplierError::Producer(error) => SupplierError::Producer(Arc::clone(error)),
            SupplierError::Closed { name } => SupplierError::Closed { name: name.clone() },
        }
    }
}
