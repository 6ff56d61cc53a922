use crate::features::observability::repo::ObservabilityRepository;
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.repo.observe_api_request(endpoint, status, seconds);
    }

    pub fn record_workload_operation(&self, operation: &str, succeeded: bool) {
        let result = if succeeded { "ok" } else { "error" };
        self.repo.inc_workload_operation(operation, result);
    }

    pub fn record_reconciled(&self, recreated: usize) {
        self.repo.inc_reconciled_workloads(recreated as u64);
    }

    pub fn set_managed_instances(&self, count: usize) {
        self.repo.set_managed_instances(count as f64);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
