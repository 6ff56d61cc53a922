pub mod http;

use crate::shared::error::ControlPlaneResult;
use async_trait::async_trait;

pub use http::HttpExistenceVerifier;

/// Probes the upstream services an instance filter refers to.
///
/// `Ok(false)` means the referenced entity does not exist (or is not visible
/// to the caller); `Err` means the probe itself failed.
#[async_trait]
pub trait ExistenceVerifier: Send + Sync {
    async fn verify_device(&self, id: &str, token: &str) -> ControlPlaneResult<bool>;

    async fn verify_pipeline(&self, id: &str, token: &str, user_id: &str)
        -> ControlPlaneResult<bool>;

    async fn verify_import(&self, id: &str, token: &str, user_id: &str) -> ControlPlaneResult<bool>;
}
