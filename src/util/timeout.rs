//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::IbtikarError;

/// Wrap a future with a timeout.
///
/// The elapsed case is reported as [`IbtikarError::Timeout`], converted into
/// the caller's error type.
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<IbtikarError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(IbtikarError::Timeout(duration.as_millis() as u64).into()),
    }
}
