// ABOUTME: Rollback scenarios: candidate selection, validation, re-activation.
// ABOUTME: Covers the two-release deploy/rollback cycle end to end.

mod support;

use chrono::Utc;
use skala::config::Strategy;
use skala::deploy::record::{DeploymentKind, DeploymentRecord};
use skala::deploy::{DeployErrorKind, DeploymentStatus};
use skala::store::Store;
use std::path::Path;
use support::Engine;

#[tokio::test]
async fn rollback_to_previous_reactivates_the_old_release() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let engine = Engine::new();
    let mut config = support::test_config(
        support::unique_app("rb-cycle"),
        repo.path(),
        &target.path().join("app"),
    );
    config.custom_shared_paths = Some(vec![".env".to_string()]);

    // First deploy; the application then writes its .env through the link.
    let d1 = engine.deploy(&config, None).await;
    let r1 = engine.store.deployment(&d1).await.unwrap();
    assert_eq!(r1.status, DeploymentStatus::Success);
    let r1_path = r1.release_path.clone().unwrap();
    std::fs::write(Path::new(&r1_path).join(".env"), "APP_KEY=seeded\n").unwrap();

    // Second deploy shares the same .env and takes over.
    support::git_commit_change(repo.path(), "<h1>v2</h1>\n", "second release");
    let d2 = engine.deploy(&config, None).await;
    let r2 = engine.store.deployment(&d2).await.unwrap();
    assert!(r2.is_active);
    assert!(!engine.store.deployment(&d1).await.unwrap().is_active);

    // Roll back to previous: selects d1, re-activates its release.
    let (rb_id, status) = engine
        .coordinator
        .rollback_to_previous(&engine.exec, &config)
        .await
        .expect("rollback should be accepted");
    assert_eq!(status, DeploymentStatus::Success);

    let rb = engine.store.deployment(&rb_id).await.unwrap();
    assert_eq!(rb.kind, DeploymentKind::Rollback);
    assert_eq!(rb.rollback_target, Some(d1.clone()));
    assert!(!rb.is_active, "activation belongs to the target, not the rollback record");

    // The target is active again; its sibling was deactivated in the same flip.
    assert!(engine.store.deployment(&d1).await.unwrap().is_active);
    assert!(!engine.store.deployment(&d2).await.unwrap().is_active);

    // current points at the first release again; .env content untouched.
    let current = std::fs::read_link(target.path().join("app/current")).unwrap();
    assert_eq!(current.to_string_lossy(), r1_path);
    assert_eq!(
        std::fs::read_to_string(format!("{}/shared/.env", target.path().join("app").display()))
            .unwrap(),
        "APP_KEY=seeded\n"
    );
}

#[tokio::test]
async fn rollback_without_candidate_is_not_found() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let engine = Engine::new();
    let config = support::test_config(
        support::unique_app("rb-none"),
        repo.path(),
        &target.path().join("app"),
    );

    // Only one deploy exists and it is active: nothing to roll back to.
    engine.deploy(&config, None).await;

    let err = engine
        .coordinator
        .rollback_to_previous(&engine.exec, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DeployErrorKind::NotFound);
}

#[tokio::test]
async fn rollback_to_pathless_target_fails_validation_without_a_record() {
    let engine = Engine::new();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());
    let config = support::test_config(
        support::unique_app("rb-pathless"),
        repo.path(),
        &target.path().join("app"),
    );

    // A successful record with no release path (e.g. an in-place deploy).
    let target_id = engine.store.next_deployment_id().await.unwrap();
    let mut record = DeploymentRecord::new(
        target_id.clone(),
        config.app.clone(),
        DeploymentKind::Deploy,
        Utc::now(),
    );
    record.status = DeploymentStatus::Success;
    engine.store.create_deployment(record).await.unwrap();

    let before = engine.store.deployments_for(&config.app).await.unwrap().len();

    let err = engine
        .coordinator
        .rollback_to(&engine.exec, &config, &target_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DeployErrorKind::Validation);

    // No rollback record was created, so none can linger non-terminal.
    let after = engine.store.deployments_for(&config.app).await.unwrap();
    assert_eq!(after.len(), before);
    assert!(after.iter().all(|r| r.kind != DeploymentKind::Rollback));
}

#[tokio::test]
async fn rollback_to_active_target_fails_validation() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let engine = Engine::new();
    let config = support::test_config(
        support::unique_app("rb-active"),
        repo.path(),
        &target.path().join("app"),
    );

    let d1 = engine.deploy(&config, None).await;
    assert!(engine.store.deployment(&d1).await.unwrap().is_active);

    let err = engine
        .coordinator
        .rollback_to(&engine.exec, &config, &d1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DeployErrorKind::Validation);
}

#[tokio::test]
async fn in_place_strategy_rejects_rollback() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let engine = Engine::new();
    let mut config = support::test_config(
        support::unique_app("rb-inplace"),
        repo.path(),
        &target.path().join("app"),
    );
    config.strategy = Strategy::InPlace;

    let err = engine
        .coordinator
        .rollback_to_previous(&engine.exec, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DeployErrorKind::Validation);
}

#[tokio::test]
async fn rollback_to_missing_directory_fails_and_flags_the_app() {
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    support::git_fixture(repo.path());

    let engine = Engine::new();
    let config = support::test_config(
        support::unique_app("rb-missing"),
        repo.path(),
        &target.path().join("app"),
    );

    let d1 = engine.deploy(&config, None).await;
    let d2 = engine.deploy(&config, None).await;
    assert!(engine.store.deployment(&d2).await.unwrap().is_active);

    // The old release directory vanishes out from under the records.
    let r1_path = engine
        .store
        .deployment(&d1)
        .await
        .unwrap()
        .release_path
        .unwrap();
    std::fs::remove_dir_all(&r1_path).unwrap();

    let (rb_id, status) = engine
        .coordinator
        .rollback_to(&engine.exec, &config, &d1)
        .await
        .expect("validation passes; failure happens during execution");
    assert_eq!(status, DeploymentStatus::Failed);

    let rb = engine.store.deployment(&rb_id).await.unwrap();
    assert!(rb.log.contains("ERROR:"));

    // A failed rollback flags the application itself.
    assert_eq!(
        engine.store.app_status(&config.app).await.unwrap(),
        skala::deploy::AppStatus::Failed
    );

    // The active deployment is untouched.
    assert!(engine.store.deployment(&d2).await.unwrap().is_active);
}
