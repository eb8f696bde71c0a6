// ABOUTME: Persistence seam for deployment and application records.
// ABOUTME: One async trait; the in-memory backend lives in memory.rs.

mod memory;

pub use memory::MemoryStore;

use crate::deploy::record::{AppStatus, DeploymentRecord, DeploymentStatus};
use crate::types::{AppName, DeploymentId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Partial update of a deployment record. `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub release_id: Option<crate::types::ReleaseId>,
    pub release_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Repository interface the engine reads and writes records through.
///
/// Implementations must make [`mark_active`](Store::mark_active) atomic with
/// respect to other record updates: activating one deployment and
/// deactivating its siblings is one logical operation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Allocate the next deployment id.
    async fn next_deployment_id(&self) -> Result<DeploymentId, StoreError>;

    async fn create_deployment(&self, record: DeploymentRecord) -> Result<(), StoreError>;

    async fn deployment(&self, id: &DeploymentId) -> Result<DeploymentRecord, StoreError>;

    /// Apply a partial update. Status changes are validated against the
    /// lifecycle; moving out of a terminal state is rejected.
    async fn update_deployment(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> Result<(), StoreError>;

    /// Append a line to the deployment's log. Returns the new log length in
    /// bytes, which subscribers use as a resume offset.
    async fn append_log(&self, id: &DeploymentId, line: &str) -> Result<usize, StoreError>;

    /// Set `is_active` on this deployment and clear it on every other
    /// deployment of the same application, as one atomic operation.
    async fn mark_active(&self, id: &DeploymentId) -> Result<(), StoreError>;

    /// All deployments for an application, newest first.
    async fn deployments_for(&self, app: &AppName) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// The currently active deployment for an application, if any.
    async fn active_deployment(
        &self,
        app: &AppName,
    ) -> Result<Option<DeploymentRecord>, StoreError>;

    /// The newest successful deployment with a non-null release path,
    /// excluding `exclude` (typically the active deployment). This is the
    /// rollback candidate query.
    async fn rollback_candidate(
        &self,
        app: &AppName,
        exclude: Option<&DeploymentId>,
    ) -> Result<Option<DeploymentRecord>, StoreError>;

    /// Deployments still `running` whose run started before `cutoff`.
    /// Used by the supervisory sweep to fail records whose worker died.
    async fn stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// Delete a deployment record. Any `rollback_target` references pointing
    /// at it are nulled out; the reference is non-owning.
    async fn delete_deployment(&self, id: &DeploymentId) -> Result<(), StoreError>;

    async fn set_app_status(&self, app: &AppName, status: AppStatus) -> Result<(), StoreError>;

    async fn app_status(&self, app: &AppName) -> Result<AppStatus, StoreError>;
}
