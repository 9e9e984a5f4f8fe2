pub mod v3;
pub mod v3_grpc;

use std::future::Future;
use std::time::Duration;

use crate::errors::BackendError;

/// Applies an operation deadline on top of whatever deadline the caller
/// already carries.
pub(crate) async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout),
    }
}
