use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs one downstream call under `limit`. `call` names the sub-call in the
/// resulting error and log line.
pub async fn bounded<T, E, F>(limit: Duration, call: &str, future: F) -> ControlPlaneResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ControlPlaneError>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            warn!(call, timeout_ms = limit.as_millis() as u64, "Downstream call timed out");
            Err(ControlPlaneError::Timeout(format!(
                "{call} exceeded {}ms",
                limit.as_millis()
            )))
        }
    }
}
