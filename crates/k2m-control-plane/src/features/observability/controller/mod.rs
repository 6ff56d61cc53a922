use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use std::sync::Arc;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller over a fresh registry.
    pub fn with_registry() -> Result<Arc<Self>, String> {
        let repo = Arc::new(ObservabilityRepository::new()?);
        Ok(Arc::new(Self::new(ObservabilityService::new(repo))))
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.service.record_api_request(endpoint, status, seconds);
    }

    pub fn record_workload_operation(&self, operation: &str, succeeded: bool) {
        self.service.record_workload_operation(operation, succeeded);
    }

    pub fn record_reconciled(&self, recreated: usize) {
        self.service.record_reconciled(recreated);
    }

    pub fn set_managed_instances(&self, count: usize) {
        self.service.set_managed_instances(count);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}
