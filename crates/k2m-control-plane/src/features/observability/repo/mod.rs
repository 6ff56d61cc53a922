use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    managed_instances: Gauge,
    reconciled_workloads_total: Counter,
    workload_operations_total: CounterVec,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let managed_instances = Gauge::with_opts(opts!(
            "k2m_managed_instances",
            "Export instances known to the catalog"
        ))
        .map_err(|e| e.to_string())?;
        let reconciled_workloads_total = Counter::with_opts(opts!(
            "k2m_reconciled_workloads_total",
            "Workloads recreated by reconciliation"
        ))
        .map_err(|e| e.to_string())?;
        let workload_operations_total = CounterVec::new(
            opts!(
                "k2m_workload_operations_total",
                "Deployment backend operations"
            ),
            &["operation", "result"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!("k2m_api_request_total", "Control plane API request total"),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "k2m_api_request_latency_seconds",
                "Control plane API request latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(managed_instances.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(reconciled_workloads_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(workload_operations_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            managed_instances,
            reconciled_workloads_total,
            workload_operations_total,
            api_request_total,
            api_request_latency_seconds,
        })
    }

    pub fn set_managed_instances(&self, count: f64) {
        self.managed_instances.set(count);
    }

    pub fn inc_reconciled_workloads(&self, count: u64) {
        self.reconciled_workloads_total.inc_by(count as f64);
    }

    pub fn inc_workload_operation(&self, operation: &str, result: &str) {
        self.workload_operations_total
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
