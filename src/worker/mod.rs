// ABOUTME: Deployment job queue and worker pool.
// ABOUTME: One worker task per job; a sweep fails records whose worker died.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::deploy::record::{DeploymentKind, DeploymentStatus};
use crate::deploy::{ActivationLocks, DeployError, Orchestrator, RollbackCoordinator};
use crate::events::LogPublisher;
use crate::exec::Executor;
use crate::store::{DeploymentPatch, Store, StoreError};
use crate::types::DeploymentId;

/// Queued deployments waiting for a worker.
const QUEUE_DEPTH: usize = 32;

enum JobKind {
    Deploy { commit: Option<String> },
    /// Rollback already validated and prepared; only execution remains.
    RollbackExecute,
}

struct Job {
    id: DeploymentId,
    config: AppConfig,
    executor: Arc<dyn Executor>,
    kind: JobKind,
}

/// Accepts deployment requests and runs them on a pool of worker tasks.
///
/// Long remote commands block a worker for minutes, so the pool keeps one
/// slow application from starving the rest. Nothing here serializes two
/// dispatches for the same application — the per-application deploy lock on
/// the target host does that, failing the second dispatch fast.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    publisher: Arc<LogPublisher>,
    orchestrator: Arc<Orchestrator>,
    coordinator: Arc<RollbackCoordinator>,
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<LogPublisher>, workers: usize) -> Self {
        let locks = Arc::new(ActivationLocks::default());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            Arc::clone(&locks),
        ));
        let coordinator = Arc::new(RollbackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            locks,
        ));

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|_| {
                tokio::spawn(worker_loop(
                    Arc::clone(&rx),
                    Arc::clone(&orchestrator),
                    Arc::clone(&coordinator),
                ))
            })
            .collect();

        Self {
            store,
            publisher,
            orchestrator,
            coordinator,
            tx,
            workers,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn coordinator(&self) -> &Arc<RollbackCoordinator> {
        &self.coordinator
    }

    /// Create a pending deployment record and queue it for a worker.
    pub async fn dispatch_deploy(
        &self,
        config: AppConfig,
        executor: Arc<dyn Executor>,
        commit: Option<String>,
    ) -> Result<DeploymentId, DeployError> {
        let id = self.orchestrator.prepare_deploy(&config).await?;
        self.enqueue(Job {
            id: id.clone(),
            config,
            executor,
            kind: JobKind::Deploy { commit },
        })
        .await?;
        Ok(id)
    }

    /// Validate a rollback, create its pending record, and queue execution.
    ///
    /// Precondition violations surface here, synchronously, before any
    /// record exists or any remote command runs. `target` of `None` selects
    /// the most recent eligible prior deployment.
    pub async fn dispatch_rollback(
        &self,
        config: AppConfig,
        executor: Arc<dyn Executor>,
        target: Option<DeploymentId>,
    ) -> Result<DeploymentId, DeployError> {
        let id = match &target {
            Some(target_id) => {
                self.coordinator
                    .prepare_rollback_to(&config, target_id)
                    .await?
            }
            None => {
                self.coordinator
                    .prepare_rollback_to_previous(&config)
                    .await?
            }
        };

        self.enqueue(Job {
            id: id.clone(),
            config,
            executor,
            kind: JobKind::RollbackExecute,
        })
        .await?;
        Ok(id)
    }

    async fn enqueue(&self, job: Job) -> Result<(), DeployError> {
        self.tx.send(job).await.map_err(|_| {
            DeployError::from(StoreError::Backend(
                "deployment queue is closed".to_string(),
            ))
        })
    }

    /// Fail `running` records older than `max_age`.
    ///
    /// A worker killed mid-script leaves its record `running` with no one to
    /// finish it; this sweep makes the crash observable as `failed` instead
    /// of leaving the record running forever.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let stale = self.store.stale_running(cutoff).await?;
        let count = stale.len();

        for record in stale {
            if let Err(e) = self
                .publisher
                .append(
                    &record.id,
                    "ERROR: deployment worker lost; marking as failed",
                )
                .await
            {
                tracing::error!("failed to log stale deployment {}: {}", record.id, e);
            }
            if let Err(e) = self
                .store
                .update_deployment(
                    &record.id,
                    DeploymentPatch {
                        status: Some(DeploymentStatus::Failed),
                        finished_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await
            {
                tracing::error!("failed to fail stale deployment {}: {}", record.id, e);
                continue;
            }
            self.publisher.complete(&record.id, DeploymentStatus::Failed);
        }

        Ok(count)
    }

    /// Stop accepting jobs and wait for in-flight work to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    orchestrator: Arc<Orchestrator>,
    coordinator: Arc<RollbackCoordinator>,
) {
    loop {
        // Hold the lock only while waiting; processing happens outside it so
        // other workers can pick up the next job.
        let job = rx.lock().await.recv().await;
        let Some(job) = job else { break };

        let status = match &job.kind {
            JobKind::Deploy { commit } => {
                orchestrator
                    .run_deploy(job.executor.as_ref(), &job.config, &job.id, commit.as_deref())
                    .await
            }
            JobKind::RollbackExecute => {
                coordinator
                    .execute(job.executor.as_ref(), &job.config, &job.id)
                    .await
            }
        };

        let kind = match job.kind {
            JobKind::Deploy { .. } => DeploymentKind::Deploy,
            JobKind::RollbackExecute => DeploymentKind::Rollback,
        };
        tracing::info!("{:?} {} finished with status {}", kind, job.id, status);
    }
}
