use crate::{BackendKind, DeploymentBackend, WorkloadSpec};
use async_trait::async_trait;
use k2m_core::{CoreError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-local backend that only records workloads.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    workloads: Arc<RwLock<HashMap<String, WorkloadSpec>>>,
    sequence: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with a backend error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drops a workload without going through `remove`, as a crash would.
    pub async fn evict(&self, workload_id: &str) -> Option<WorkloadSpec> {
        self.workloads.write().await.remove(workload_id)
    }

    pub async fn workload(&self, workload_id: &str) -> Option<WorkloadSpec> {
        self.workloads.read().await.get(workload_id).cloned()
    }

    pub async fn workload_count(&self) -> usize {
        self.workloads.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Backend("backend unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeploymentBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn create(&self, spec: &WorkloadSpec) -> Result<String> {
        self.check_available()?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let workload_id = format!("{}-{sequence}", spec.name);
        self.workloads
            .write()
            .await
            .insert(workload_id.clone(), spec.clone());
        debug!(%workload_id, "Workload recorded");
        Ok(workload_id)
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        self.check_available()?;
        self.workloads
            .write()
            .await
            .remove(workload_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::WorkloadNotFound(workload_id.to_string()))
    }

    async fn exists(&self, workload_id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.workloads.read().await.contains_key(workload_id))
    }
}
