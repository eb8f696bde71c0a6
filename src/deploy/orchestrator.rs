// ABOUTME: Drives one deployment record end-to-end through the release workflow.
// ABOUTME: Catch-all boundary: every failure ends in a logged, terminal state.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, Strategy};
use crate::events::LogPublisher;
use crate::exec::{Executor, LineSink, quote};
use crate::store::{DeploymentPatch, Store};
use crate::types::{AppName, DeploymentId, ReleaseId};

use super::error::{DeployError, DeployErrorKind};
use super::lock::DeployLock;
use super::record::DeploymentStatus;
use super::script::{self, ScriptContext};
use super::{Deployment, Initialized};

/// Per-application mutexes serializing activation and pruning.
///
/// The `current` symlink and `releases/` are the only shared mutable state
/// under a deploy path; the swap and the prune must not interleave for one
/// application. The guard is held only around those two steps, not the whole
/// run — the cross-host deploy lock covers the run.
#[derive(Default)]
pub struct ActivationLocks {
    locks: parking_lot::Mutex<HashMap<AppName, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActivationLocks {
    pub fn for_app(&self, app: &AppName) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(app.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Orchestrates forward deployments.
///
/// One call to [`run_deploy`](Orchestrator::run_deploy) drives one persisted
/// deployment record from `running` to a terminal state. The caller never
/// sees an error: failures are logged into the record and reported as
/// `failed`, so a dispatched deployment can always be observed via the store
/// or the event stream.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    publisher: Arc<LogPublisher>,
    locks: Arc<ActivationLocks>,
}

impl Orchestrator {
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

    /// Create the pending record for a new deploy attempt.
    ///
    /// Every dispatch makes a fresh record and (for atomic strategy) a fresh
    /// release; prior attempts are never mutated.
    pub async fn prepare_deploy(&self, config: &AppConfig) -> Result<DeploymentId, DeployError> {
        let id = self.store.next_deployment_id().await?;
        let record = super::record::DeploymentRecord::new(
            id.clone(),
            config.app.clone(),
            super::record::DeploymentKind::Deploy,
            Utc::now(),
        );
        self.store.create_deployment(record).await?;
        Ok(id)
    }

    /// Run a prepared deployment to a terminal state.
    ///
    /// The whole run is bounded by the config's deploy budget; exceeding it
    /// abandons the remote command and fails the record with a `TIMEOUT:`
    /// log marker.
    pub async fn run_deploy(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
        commit: Option<&str>,
    ) -> DeploymentStatus {
        let budget = config.deploy_timeout;

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
            tracing::error!("failed to mark deployment {} running: {}", id, e);
            return self.force_failed(id).await;
        }

        self.log(
            id,
            &format!(
                "Deployment of {} started ({} branch, {:?} strategy)",
                config.app, config.branch, config.strategy
            ),
        )
        .await;

        let result = tokio::time::timeout(budget, self.deploy_inner(exec, config, id, commit)).await;
        self.finish(id, "deploy", budget, result).await
    }

    /// Convert an inner result into a terminal record state plus completion
    /// event. Shared failure boundary for deploys.
    async fn finish(
        &self,
        id: &DeploymentId,
        operation: &str,
        budget: Duration,
        result: Result<Result<(), DeployError>, tokio::time::error::Elapsed>,
    ) -> DeploymentStatus {
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
                    &format!("TIMEOUT: {operation} exceeded its budget of {budget:?}"),
                )
                .await;
                DeploymentStatus::Failed
            }
        };

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
            tracing::error!("failed to finish deployment {}: {}", id, e);
        }

        self.publisher.complete(id, status);
        status
    }

    /// Last-resort terminal transition when bookkeeping itself failed.
    async fn force_failed(&self, id: &DeploymentId) -> DeploymentStatus {
        let _ = self
            .store
            .update_deployment(
                id,
                DeploymentPatch {
                    status: Some(DeploymentStatus::Failed),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
        self.publisher.complete(id, DeploymentStatus::Failed);
        DeploymentStatus::Failed
    }

    async fn deploy_inner(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
        commit: Option<&str>,
    ) -> Result<(), DeployError> {
        // Render up front: a bad template or substitution value fails the
        // deployment before anything touches the host.
        let rendered =
            script::render(script::script_template(config), &ScriptContext::for_config(config))?;

        let lock = DeployLock::acquire(exec, &config.app, false).await?;

        let result = match config.strategy {
            Strategy::Atomic => self.deploy_atomic(exec, config, id, commit, &rendered).await,
            Strategy::InPlace => self.deploy_in_place(exec, config, id, &rendered).await,
        };

        if lock.release().await.is_err() {
            tracing::warn!("failed to release deploy lock for {}", config.app);
        }
        result
    }

    async fn deploy_atomic(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
        commit: Option<&str>,
        rendered_script: &str,
    ) -> Result<(), DeployError> {
        let deployment = Deployment::<Initialized>::new(config.clone());

        self.log(id, "Creating release directory").await;
        let deployment = deployment.create_release(exec, Utc::now()).await?;
        self.store
            .update_deployment(
                id,
                DeploymentPatch {
                    release_id: Some(deployment.release_id().clone()),
                    release_path: Some(deployment.release_path().to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.log(id, &format!("Created release {}", deployment.release_id()))
            .await;

        self.log(
            id,
            &format!(
                "Checking out {} from {}",
                commit.unwrap_or(&config.branch),
                config.repository
            ),
        )
        .await;
        let deployment = deployment.fetch_source(exec, commit).await?;
        self.store
            .update_deployment(
                id,
                DeploymentPatch {
                    commit_hash: Some(deployment.commit().hash.clone()),
                    commit_message: Some(deployment.commit().message.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.log(
            id,
            &format!(
                "Checked out {} ({})",
                short_hash(&deployment.commit().hash),
                deployment.commit().message
            ),
        )
        .await;

        self.log(id, "Linking shared paths").await;
        let deployment = deployment.link_shared(exec).await?;

        self.log(id, "Running deploy script").await;
        let (sink, forwarder) = self.spawn_log_forwarder(id);
        let result = deployment
            .run_script(exec, rendered_script, config.deploy_timeout, sink)
            .await;
        let _ = forwarder.await;
        let deployment = result?;

        // Activation and pruning are serialized per application.
        let app_lock = self.locks.for_app(&config.app);
        let guard = app_lock.lock().await;

        self.log(id, "Activating release").await;
        let deployment = deployment.activate(exec).await?;
        self.store.mark_active(id).await?;
        self.log(
            id,
            &format!("Release {} is now live", deployment.release_id()),
        )
        .await;

        let protected = self.protected_releases(&config.app).await?;
        let (deployment, removed) = deployment
            .cleanup(exec, config.releases_to_keep.get(), &protected)
            .await;
        drop(guard);

        if !removed.is_empty() {
            self.log(id, &format!("Pruned {} old release(s)", removed.len()))
                .await;
        }

        self.log(
            id,
            &format!(
                "Deployment finished successfully ({})",
                deployment.release_id()
            ),
        )
        .await;
        Ok(())
    }

    async fn deploy_in_place(
        &self,
        exec: &dyn Executor,
        config: &AppConfig,
        id: &DeploymentId,
        rendered_script: &str,
    ) -> Result<(), DeployError> {
        let deploy_path = config.deploy_path();

        let output = exec.exec(&format!("mkdir -p {}", quote(&deploy_path))).await?;
        if !output.success() {
            return Err(crate::release::Error::CreateFailed {
                path: deploy_path,
                detail: output.stderr.trim().to_string(),
            }
            .into());
        }

        self.log(id, "Running deploy script in place").await;
        let command = format!("set -e\ncd {}\n{}", quote(&deploy_path), rendered_script);
        let (sink, forwarder) = self.spawn_log_forwarder(id);
        let result = exec
            .exec_streamed(&command, config.deploy_timeout, sink)
            .await;
        let _ = forwarder.await;
        let output = result?;

        if !output.success() {
            return Err(DeployError::ScriptFailed {
                exit_code: output.exit_code,
            });
        }

        // In-place trees are usually git checkouts; record HEAD when readable.
        let head = exec
            .exec(&format!(
                "git -C {} rev-parse HEAD 2>/dev/null || true",
                quote(&config.deploy_path())
            ))
            .await;
        if let Ok(output) = head {
            let hash = output.stdout.trim();
            if !hash.is_empty() {
                let _ = self
                    .store
                    .update_deployment(
                        id,
                        DeploymentPatch {
                            commit_hash: Some(hash.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
            }
        }

        self.log(id, "Deployment finished successfully").await;
        Ok(())
    }

    /// Release ids that must survive pruning: the active release and any
    /// release referenced by a non-terminal record or by the target of an
    /// in-flight rollback.
    async fn protected_releases(&self, app: &AppName) -> Result<Vec<ReleaseId>, DeployError> {
        let records = self.store.deployments_for(app).await?;

        let pending_targets: HashSet<DeploymentId> = records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .filter_map(|r| r.rollback_target.clone())
            .collect();

        let mut protected = Vec::new();
        for record in &records {
            let keep = record.is_active
                || !record.status.is_terminal()
                || pending_targets.contains(&record.id);
            if keep && let Some(release_id) = &record.release_id {
                protected.push(release_id.clone());
            }
        }
        Ok(protected)
    }

    /// Forward streamed script output lines into the deployment log.
    /// The worker never waits on subscribers; the forwarder drains after the
    /// sink is dropped.
    fn spawn_log_forwarder(&self, id: &DeploymentId) -> (LineSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let publisher = Arc::clone(&self.publisher);
        let id = id.clone();
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = publisher.append(&id, &line).await {
                    tracing::error!("failed to append streamed log line: {}", e);
                }
            }
        });
        (tx, handle)
    }

    async fn log(&self, id: &DeploymentId, line: &str) {
        if let Err(e) = self.publisher.append(id, line).await {
            tracing::error!("failed to append deployment log: {}", e);
        }
    }
}

fn short_hash(hash: &str) -> &str {
    if hash.len() >= 8 { &hash[..8] } else { hash }
}
