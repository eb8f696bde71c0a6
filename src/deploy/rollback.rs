// ABOUTME: Rollback coordination: validate a target, re-activate its release.
// ABOUTME: No rebuild runs; a rollback is a shared-path relink plus symlink swap.

use chrono::Utc;
use std::sync::Arc;

use crate::config::{AppConfig, Strategy};
use crate::events::LogPublisher;
use crate::exec::Executor;
use crate::release::{self, Layout};
use crate::store::{DeploymentPatch, Store};
use crate::types::DeploymentId;

use super::error::{DeployError, DeployErrorKind, NoCandidateSnafu, ValidationSnafu};
use super::lock::DeployLock;
use super::orchestrator::ActivationLocks;
use super::record::{AppStatus, DeploymentKind, DeploymentRecord, DeploymentStatus};

/// Coordinates rollbacks to previously built releases.
///
/// Preconditions are validated before any record is created or any remote
/// command runs; a validation failure surfaces synchronously to the caller.
/// Once a rollback record exists, failures follow the same boundary as
/// forward deploys — logged, terminal `failed` — and additionally mark the
/// application itself as failed, since a failed rollback may leave a broken
/// release live.
pub struct RollbackCoordinator {
    store: Arc<dyn Store>,
    publisher: Arc<LogPublisher>,
    locks: Arc<ActivationLocks>,
}

impl RollbackCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<LogPublisher>,
        locks: Arc<ActivationLocks>,
    ) -> Self {
        Self {
            store,
            publisher,
            locks,
        }
    }

    /// Roll back to a specific prior deployment.
    pub async fn rollback_to(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        target_id: &DeploymentId,
    ) -> Result<(DeploymentId, DeploymentStatus), DeployError> {
        let id = self.prepare_rollback_to(config, target_id).await?;
        let status = self.execute(exec, config, &id).await;
        Ok((id, status))
    }

    /// Roll back to the most recent successful deployment that is not
    /// currently active.
    pub async fn rollback_to_previous(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
    ) -> Result<(DeploymentId, DeploymentStatus), DeployError> {
        let id = self.prepare_rollback_to_previous(config).await?;
        let status = self.execute(exec, config, &id).await;
        Ok((id, status))
    }

    /// Validate a specific target and create the pending rollback record.
    /// No remote action is taken; a precondition violation creates nothing.
    pub async fn prepare_rollback_to(
        &self,
        config: &AppConfig,
        target_id: &DeploymentId,
    ) -> Result<DeploymentId, DeployError> {
        let target = self.store.deployment(target_id).await.map_err(|_| {
            ValidationSnafu {
                message: format!("rollback target {target_id} does not exist"),
            }
            .build()
        })?;
        validate_target(config, &target)?;
        self.prepare(config, &target).await
    }

    /// Select the newest eligible prior deployment, validate it, and create
    /// the pending rollback record.
    pub async fn prepare_rollback_to_previous(
        &self,
        config: &AppConfig,
    ) -> Result<DeploymentId, DeployError> {
        ensure_atomic(config)?;

        let active = self.store.active_deployment(&config.app).await?;
        let candidate = self
            .store
            .rollback_candidate(&config.app, active.as_ref().map(|r| &r.id))
            .await?
            .ok_or_else(|| {
                NoCandidateSnafu {
                    app: config.app.clone(),
                }
                .build()
            })?;

        validate_target(config, &candidate)?;
        self.prepare(config, &candidate).await
    }

    async fn prepare(
        &self,
        config: &AppConfig,
        target: &DeploymentRecord,
    ) -> Result<DeploymentId, DeployError> {
        let id = self.store.next_deployment_id().await?;
        let mut record = DeploymentRecord::new(
            id.clone(),
            config.app.clone(),
            DeploymentKind::Rollback,
            Utc::now(),
        );
        record.rollback_target = Some(target.id.clone());
        record.release_id = target.release_id.clone();
        record.release_path = target.release_path.clone();
        record.commit_hash = target.commit_hash.clone();
        record.commit_message = target.commit_message.clone();
        self.store.create_deployment(record).await?;
        Ok(id)
    }

    /// Run a prepared rollback record to a terminal state.
    ///
    /// Bounded by the rollback budget, which is much shorter than a deploy's:
    /// only a relink and a symlink swap run.
    pub async fn execute(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
    ) -> DeploymentStatus {
        let budget = config.rollback_timeout;

        if let Err(e) = self
            .store
            .update_deployment(
                id,
                DeploymentPatch {
                    status: Some(DeploymentStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::error!("failed to mark rollback {} running: {}", id, e);
            return self.conclude(id, config, DeploymentStatus::Failed).await;
        }

        self.log(id, &format!("Rollback of {} started", config.app))
            .await;

        let result = tokio::time::timeout(budget, self.rollback_inner(exec, config, id)).await;

        let status = match result {
            Ok(Ok(())) => DeploymentStatus::Success,
            Ok(Err(e)) => {
                let marker = if e.kind() == DeployErrorKind::Timeout {
                    "TIMEOUT"
                } else {
                    "ERROR"
                };
                self.log(id, &format!("{marker}: {e}")).await;
                DeploymentStatus::Failed
            }
            Err(_) => {
                self.log(
                    id,
                    &format!("TIMEOUT: rollback exceeded its budget of {budget:?}"),
                )
                .await;
                DeploymentStatus::Failed
            }
        };

        self.conclude(id, config, status).await
    }

    async fn conclude(
        &self,
        id: &DeploymentId,
        config: &AppConfig,
        status: DeploymentStatus,
    ) -> DeploymentStatus {
        if let Err(e) = self
            .store
            .update_deployment(
                id,
                DeploymentPatch {
                    status: Some(status),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::error!("failed to finish rollback {}: {}", id, e);
        }

        // A failed rollback can leave a broken release live; flag the
        // application, not just the record.
        let app_status = match status {
            DeploymentStatus::Failed => AppStatus::Failed,
            _ => AppStatus::Ok,
        };
        if let Err(e) = self.store.set_app_status(&config.app, app_status).await {
            tracing::error!("failed to update application status: {}", e);
        }

        self.publisher.complete(id, status);
        status
    }

    async fn rollback_inner(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
    ) -> Result<(), DeployError> {
        let lock = DeployLock::acquire(exec, &config.app, false).await?;
        let result = self.rollback_steps(exec, config, id).await;
        if lock.release().await.is_err() {
            tracing::warn!("failed to release deploy lock for {}", config.app);
        }
        result
    }

    async fn rollback_steps(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
    ) -> Result<(), DeployError> {
        let record = self.store.deployment(id).await?;
        let release_path = record.release_path.ok_or_else(|| {
            ValidationSnafu {
                message: "rollback record has no release path".to_string(),
            }
            .build()
        })?;
        let target_id = record.rollback_target.ok_or_else(|| {
            ValidationSnafu {
                message: "rollback record has no target".to_string(),
            }
            .build()
        })?;

        let layout = Layout::new(config.deploy_path());

        // The database row and the directory are correlated by path only;
        // reconcile before touching the symlink.
        let missing = release::verify_releases(exec, std::slice::from_ref(&release_path)).await?;
        if let Some(path) = missing.into_iter().next() {
            return Err(release::Error::ReleaseMissing(path).into());
        }

        self.log(id, "Re-linking shared paths").await;
        release::link_shared_paths(exec, &layout, &release_path, &config.shared_paths()).await?;

        let app_lock = self.locks.for_app(&config.app);
        let guard = app_lock.lock().await;

        self.log(id, &format!("Re-activating release at {}", release_path))
            .await;
        release::activate(exec, &layout, &release_path).await?;
        // The target deployment owns the re-activated release; activation
        // moves back to it, deactivating every sibling in the same flip.
        self.store.mark_active(&target_id).await?;
        drop(guard);

        self.log(id, "Rollback finished successfully").await;
        Ok(())
    }

    async fn log(&self, id: &DeploymentId, line: &str) {
        if let Err(e) = self.publisher.append(id, line).await {
            tracing::error!("failed to append rollback log: {}", e);
        }
    }
}

fn ensure_atomic(config: &AppConfig) -> Result<(), DeployError> {
    if config.strategy != Strategy::Atomic {
        return ValidationSnafu {
            message: format!(
                "application '{}' uses the in_place strategy, which does not support rollback",
                config.app
            ),
        }
        .fail();
    }
    Ok(())
}

fn validate_target(config: &AppConfig, target: &DeploymentRecord) -> Result<(), DeployError> {
    ensure_atomic(config)?;

    if target.app != config.app {
        return ValidationSnafu {
            message: format!(
                "rollback target {} belongs to application '{}', not '{}'",
                target.id, target.app, config.app
            ),
        }
        .fail();
    }

    if target.status != DeploymentStatus::Success {
        return ValidationSnafu {
            message: format!(
                "rollback target {} did not finish successfully (status: {})",
                target.id, target.status
            ),
        }
        .fail();
    }

    if target.release_path.is_none() {
        return ValidationSnafu {
            message: format!("rollback target {} has no release path", target.id),
        }
        .fail();
    }

    if target.is_active {
        return ValidationSnafu {
            message: format!("rollback target {} is already the active release", target.id),
        }
        .fail();
    }

    Ok(())
}
