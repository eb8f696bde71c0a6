// ABOUTME: In-memory store backend with optional JSON snapshots.
// ABOUTME: Backs the CLI binary and the test suite.

use super::{DeploymentPatch, Store, StoreError};
use crate::deploy::record::{AppStatus, DeploymentRecord, DeploymentStatus};
use crate::types::{AppName, DeploymentId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    deployments: HashMap<DeploymentId, DeploymentRecord>,
    apps: HashMap<AppName, AppStatus>,
    next_seq: u64,
}

/// Record store held in process memory.
///
/// Snapshots can be saved to and loaded from a JSON file so the CLI keeps
/// deployment history between invocations.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot previously written by [`save`](Self::save).
    /// A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text =
            std::fs::read_to_string(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let inner: Inner =
            serde_json::from_str(&text).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Write the current state as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let inner = self.inner.read();
        let text = serde_json::to_string_pretty(&*inner)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_deployment_id(&self) -> Result<DeploymentId, StoreError> {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        Ok(DeploymentId::new(format!("d-{}", inner.next_seq)))
    }

    async fn create_deployment(&self, record: DeploymentRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.apps.entry(record.app.clone()).or_default();
        inner.deployments.insert(record.id.clone(), record);
        Ok(())
    }

    async fn deployment(&self, id: &DeploymentId) -> Result<DeploymentRecord, StoreError> {
        self.inner
            .read()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if let Some(status) = patch.status {
            if !record.status.can_transition(status) {
                return Err(StoreError::InvalidTransition {
                    from: record.status,
                    to: status,
                });
            }
            record.status = status;
        }
        if let Some(hash) = patch.commit_hash {
            record.commit_hash = Some(hash);
        }
        if let Some(message) = patch.commit_message {
            record.commit_message = Some(message);
        }
        if let Some(release_id) = patch.release_id {
            record.release_id = Some(release_id);
        }
        if let Some(release_path) = patch.release_path {
            record.release_path = Some(release_path);
        }
        if let Some(at) = patch.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = patch.finished_at {
            record.finished_at = Some(at);
        }
        Ok(())
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.log.push_str(line);
        record.log.push('\n');
        Ok(record.log.len())
    }

    async fn mark_active(&self, id: &DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let app = inner
            .deployments
            .get(id)
            .map(|r| r.app.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        // One pass under one write lock: the flip is atomic to readers.
        for record in inner.deployments.values_mut() {
            if record.app == app {
                record.is_active = record.id == *id;
            }
        }
        Ok(())
    }

    async fn deployments_for(&self, app: &AppName) -> Result<Vec<DeploymentRecord>, StoreError> {
        let inner = self.inner.read();
        let mut records: Vec<_> = inner
            .deployments
            .values()
            .filter(|r| &r.app == app)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_str().cmp(a.id.as_str())));
        Ok(records)
    }

    async fn active_deployment(
        &self,
        app: &AppName,
    ) -> Result<Option<DeploymentRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .deployments
            .values()
            .find(|r| &r.app == app && r.is_active)
            .cloned())
    }

    async fn rollback_candidate(
        &self,
        app: &AppName,
        exclude: Option<&DeploymentId>,
    ) -> Result<Option<DeploymentRecord>, StoreError> {
        let records = self.deployments_for(app).await?;
        Ok(records.into_iter().find(|r| {
            r.status == DeploymentStatus::Success
                && r.release_path.is_some()
                && Some(&r.id) != exclude
                && !r.is_active
        }))
    }

    async fn stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .deployments
            .values()
            .filter(|r| {
                r.status == DeploymentStatus::Running
                    && r.started_at.map(|at| at < cutoff).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.deployments.remove(id).is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        // The rollback_target edge is non-owning: null out dangling refs.
        for record in inner.deployments.values_mut() {
            if record.rollback_target.as_ref() == Some(id) {
                record.rollback_target = None;
            }
        }
        Ok(())
    }

    async fn set_app_status(&self, app: &AppName, status: AppStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.apps.insert(app.clone(), status);
        Ok(())
    }

    async fn app_status(&self, app: &AppName) -> Result<AppStatus, StoreError> {
        let inner = self.inner.read();
        Ok(inner.apps.get(app).copied().unwrap_or_default())
    }
}
