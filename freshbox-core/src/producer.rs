use std::future::Future;

use async_trait::async_trait;

use crate::value::RefreshResult;

/// Source of fresh values for a cached supplier.
///
/// A producer is called whenever the cached value needs a refresh. It returns
/// the new value together with its prefetch and stale timestamps, or fails
/// with its own error type.
///
/// Any async closure returning `Result<RefreshResult<T>, E>` is a producer:
///
/// ```
/// use chrono::{Duration, Utc};
/// use freshbox_core::{Producer, RefreshResult};
///
/// #[derive(Debug)]
/// struct FetchError;
///
/// impl std::fmt::Display for FetchError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("fetch failed")
///     }
/// }
///
/// impl std::error::Error for FetchError {}
///
/// let producer = || async {
///     Ok::<_, FetchError>(
///         RefreshResult::builder("token")
///             .stale_time(Utc::now() + Duration::minutes(15))
///             .build(),
///     )
/// };
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let result = producer.produce().await.unwrap();
/// assert_eq!(result.value(), &"token");
/// # });
/// ```
#[async_trait]
pub trait Producer<T>: Send + Sync {
    /// Error returned when a value cannot be produced.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce a fresh value.
    async fn produce(&self) -> Result<RefreshResult<T>, Self::Error>;
}

#[async_trait]
impl<T, E, F, Fut> Producer<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<RefreshResult<T>, E>> + Send,
    T: Send,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    async fn produce(&self) -> Result<RefreshResult<T>, E> {
        (self)().await
    }
}
