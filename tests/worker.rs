// ABOUTME: Dispatcher tests: queued jobs, completion events, stale sweep.
// ABOUTME: Workers run real deployments against tempdirs.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use skala::deploy::record::{DeploymentKind, DeploymentRecord};
use skala::deploy::{DeployErrorKind, DeploymentStatus};
use skala::events::{LogPublisher, StreamEvent};
use skala::exec::{Executor, LocalExecutor};
use skala::store::{DeploymentPatch, MemoryStore, Store};
use skala::worker::Dispatcher;
use std::sync::Arc;
use std::time::Duration;

fn wired() -> (Arc<MemoryStore>, Arc<LogPublisher>, Dispatcher) {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let publisher = Arc::new(LogPublisher::new(Arc::clone(&store_dyn)));
    let dispatcher = Dispatcher::new(store_dyn, Arc::clone(&publisher), 2);
    (store, publisher, dispatcher)
}

async fn wait_for_completion(
    publisher: &Arc<LogPublisher>,
    store: &Arc<MemoryStore>,
    id: &skala::types::DeploymentId,
) -> DeploymentStatus {
    let (_, mut rx) = publisher.subscribe(id).await.unwrap();

    // The worker may already have finished before we subscribed.
    let record = store.deployment(id).await.unwrap();
    if record.status.is_terminal() {
        return record.status;
    }

    let deadline = tokio::time::Duration::from_secs(60);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(StreamEvent::Complete { status }) => return status,
                Ok(_) => {}
                Err(_) => {
                    let record = store.deployment(id).await.unwrap();
                    if record.status.is_terminal() {
                        return record.status;
                    }
                }
            }
        }
    })
    .await
    .expect("deployment should complete")
}

#[tokio::test]
async fn dispatched_deploy_completes_and_notifies() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let (store, publisher, dispatcher) = wired();
    let config = support::test_config(
        support::unique_app("worker-deploy"),
        repo.path(),
        &target.path().join("app"),
    );

    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new());
    let id = dispatcher
        .dispatch_deploy(config.clone(), executor, None)
        .await
        .expect("dispatch should succeed");

    let status = wait_for_completion(&publisher, &store, &id).await;
    assert_eq!(status, DeploymentStatus::Success);

    let record = store.deployment(&id).await.unwrap();
    assert!(record.is_active);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn dispatch_rollback_validates_before_queueing() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let (store, _publisher, dispatcher) = wired();
    let config = support::test_config(
        support::unique_app("worker-rb"),
        repo.path(),
        &target.path().join("app"),
    );

    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new());
    let err = dispatcher
        .dispatch_rollback(config.clone(), executor, None)
        .await
        .expect_err("no candidate exists");
    assert_eq!(err.kind(), DeployErrorKind::NotFound);

    // The rejected dispatch left no record behind.
    assert!(store.deployments_for(&config.app).await.unwrap().is_empty());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn sweep_marks_abandoned_running_records_failed() {
    let (store, publisher, dispatcher) = wired();
    let app = support::unique_app("worker-sweep");

    // A record whose worker died an hour ago, still "running".
    let id = store.next_deployment_id().await.unwrap();
    let record = DeploymentRecord::new(id.clone(), app, DeploymentKind::Deploy, Utc::now());
    store.create_deployment(record).await.unwrap();
    store
        .update_deployment(
            &id,
            DeploymentPatch {
                status: Some(DeploymentStatus::Running),
                started_at: Some(Utc::now() - ChronoDuration::hours(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (_, mut rx) = publisher.subscribe(&id).await.unwrap();

    let swept = dispatcher
        .sweep_stale(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let record = store.deployment(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.finished_at.is_some());
    assert!(record.log.contains("worker lost"));

    // Subscribers saw the terminal event.
    let mut saw_complete = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(
            event,
            StreamEvent::Complete {
                status: DeploymentStatus::Failed
            }
        ) {
            saw_complete = true;
        }
    }
    assert!(saw_complete);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn sweep_leaves_recent_running_records_alone() {
    let (store, _publisher, dispatcher) = wired();
    let app = support::unique_app("worker-fresh");

    let id = store.next_deployment_id().await.unwrap();
    let record = DeploymentRecord::new(id.clone(), app, DeploymentKind::Deploy, Utc::now());
    store.create_deployment(record).await.unwrap();
    store
        .update_deployment(
            &id,
            DeploymentPatch {
                status: Some(DeploymentStatus::Running),
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let swept = dispatcher
        .sweep_stale(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(swept, 0);

    let record = store.deployment(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);

    dispatcher.shutdown().await;
}
