use super::{owned_by, InMemoryInstanceStore, InstanceQuery, InstanceStore};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::Instance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// On-disk form of an instance, including the fields the API never exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    #[serde(flatten)]
    instance: Instance,
    #[serde(rename = "UserId", default)]
    user_id: String,
    #[serde(rename = "ServiceId", default)]
    service_id: String,
    #[serde(rename = "ConsumerGroupId", default, skip_serializing_if = "Option::is_none")]
    consumer_group_id: Option<String>,
}

impl From<Instance> for InstanceRecord {
    fn from(instance: Instance) -> Self {
        Self {
            user_id: instance.user_id.clone(),
            service_id: instance.service_id.clone(),
            consumer_group_id: instance.consumer_group_id.clone(),
            instance,
        }
    }
}

impl From<InstanceRecord> for Instance {
    fn from(record: InstanceRecord) -> Self {
        Instance {
            user_id: record.user_id,
            service_id: record.service_id,
            consumer_group_id: record.consumer_group_id,
            ..record.instance
        }
    }
}

/// Instance store persisted as one JSON document.
///
/// Reads are served from memory; every write rewrites the file through a
/// temporary sibling and a rename.
pub struct FileInstanceStore {
    path: PathBuf,
    records: InMemoryInstanceStore,
    writer: Mutex<()>,
}

impl FileInstanceStore {
    pub async fn open(path: impl Into<PathBuf>) -> ControlPlaneResult<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<InstanceRecord> = serde_json::from_slice(&bytes)
                    .map_err(|e| storage_error(&path, e))?;
                records.into_iter().map(Instance::from).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(storage_error(&path, e)),
        };
        info!(path = %path.display(), count = records.len(), "Opened instance store");

        Ok(Self {
            path,
            records: InMemoryInstanceStore::from_records(records),
            writer: Mutex::new(()),
        })
    }

    /// Writes `records` as the new file content. Memory is only updated by
    /// the caller once this succeeds.
    async fn flush(&self, mut records: Vec<Instance>) -> ControlPlaneResult<()> {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let records: Vec<InstanceRecord> = records.into_iter().map(InstanceRecord::from).collect();
        let bytes =
            serde_json::to_vec_pretty(&records).map_err(|e| storage_error(&self.path, e))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error(&self.path, e))?;
        debug!(path = %self.path.display(), count = records.len(), "Flushed instance store");
        Ok(())
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> ControlPlaneError {
    ControlPlaneError::StorageError(format!("{}: {err}", path.display()))
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn list(&self, query: &InstanceQuery) -> ControlPlaneResult<(Vec<Instance>, usize)> {
        self.records.list(query).await
    }

    async fn get(&self, id: &str, owner: Option<&str>) -> ControlPlaneResult<Option<Instance>> {
        self.records.get(id, owner).await
    }

    async fn get_many(
        &self,
        ids: &[String],
        owner: Option<&str>,
    ) -> ControlPlaneResult<(Vec<Instance>, bool)> {
        self.records.get_many(ids, owner).await
    }

    async fn put(&self, instance: Instance) -> ControlPlaneResult<()> {
        let _guard = self.writer.lock().await;
        let mut candidate = self.records.snapshot()?;
        candidate.retain(|i| i.id != instance.id);
        candidate.push(instance.clone());
        self.flush(candidate).await?;
        self.records.put(instance).await
    }

    async fn delete_many(&self, ids: &[String], owner: Option<&str>) -> ControlPlaneResult<()> {
        let _guard = self.writer.lock().await;
        let mut candidate = self.records.snapshot()?;
        candidate.retain(|i| !(ids.contains(&i.id) && owned_by(i, owner)));
        self.flush(candidate).await?;
        self.records.delete_many(ids, owner).await
    }
}
