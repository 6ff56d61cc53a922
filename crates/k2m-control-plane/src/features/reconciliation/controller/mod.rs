use crate::features::observability::controller::ObservabilityController;
use crate::features::reconciliation::service::ReconciliationService;
use crate::shared::types::{PermissionSyncReport, ReconciliationReport};
use k2m_core::ErrorResponse;
use std::sync::Arc;
use tracing::info;

/// Entry point of the startup reconciliation passes
pub struct ReconciliationController {
    service: Arc<ReconciliationService>,
    observability: Arc<ObservabilityController>,
}

impl ReconciliationController {
    pub fn new(
        service: Arc<ReconciliationService>,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            service,
            observability,
        }
    }

    /// Recreates lost workloads and refreshes the reconciliation metrics.
    pub async fn ensure_all_deployed(&self) -> Result<ReconciliationReport, ErrorResponse> {
        info!("Starting workload reconciliation");

        let report = self
            .service
            .ensure_all_deployed()
            .await
            .map_err(ErrorResponse::from)?;
        self.observability.record_reconciled(report.recreated);
        self.observability.set_managed_instances(report.checked);
        Ok(report)
    }

    pub async fn sync_permissions(&self) -> Result<PermissionSyncReport, ErrorResponse> {
        info!("Starting permission reconciliation");

        self.service
            .sync_permissions()
            .await
            .map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::instance_management::service::testing::{alice, new_instance, Fixture};
    use std::time::Duration;

    #[tokio::test]
    async fn test_reconciliation_updates_metrics() {
        let fixture = Fixture::new(false).await;
        for name in ["a", "b"] {
            let created = fixture
                .service
                .create(new_instance(name), &alice())
                .await
                .unwrap();
            if name == "a" {
                fixture.backend.evict(&created.service_id).await;
            }
        }

        let service = Arc::new(ReconciliationService::new(
            fixture.service.clone(),
            Duration::from_secs(1),
        ));
        let controller = ReconciliationController::new(service, fixture.observability.clone());
        let report = controller.ensure_all_deployed().await.unwrap();
        assert_eq!(report.recreated, 1);

        let metrics = fixture.observability.render_metrics().unwrap();
        assert!(metrics.contains("k2m_reconciled_workloads_total 1"));
        assert!(metrics.contains("k2m_managed_instances 2"));
    }

    #[tokio::test]
    async fn test_reconciliation_error_conversion() {
        let fixture = Fixture::new(false).await;
        fixture
            .service
            .create(new_instance("a"), &alice())
            .await
            .unwrap();
        fixture.backend.set_failing(true);

        let service = Arc::new(ReconciliationService::new(
            fixture.service.clone(),
            Duration::from_secs(1),
        ));
        let controller = ReconciliationController::new(service, fixture.observability.clone());
        let error = controller.ensure_all_deployed().await.unwrap_err();
        assert_eq!(error.error_code, "BACKEND_ERROR");
    }
}
