// ABOUTME: Integration tests for release directory lifecycle.
// ABOUTME: Exercises create, activate, list, and prune against tempdirs.

mod support;

use chrono::{Duration, Utc};
use skala::exec::LocalExecutor;
use skala::release::{self, Layout};
use skala::types::ReleaseId;

fn layout(dir: &tempfile::TempDir) -> Layout {
    Layout::new(dir.path().join("app").to_string_lossy().into_owned())
}

#[tokio::test]
async fn ensure_layout_creates_skeleton_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    release::ensure_layout(&exec, &layout).await.unwrap();
    release::ensure_layout(&exec, &layout).await.unwrap();

    assert!(std::path::Path::new(&layout.releases_dir()).is_dir());
    assert!(std::path::Path::new(&layout.shared_dir()).is_dir());
}

#[tokio::test]
async fn create_release_dir_refuses_existing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);
    let id = ReleaseId::generate(Utc::now());

    release::create_release_dir(&exec, &layout, &id)
        .await
        .expect("first create should succeed");

    let result = release::create_release_dir(&exec, &layout, &id).await;
    assert!(matches!(result, Err(release::Error::ReleaseExists(_))));
}

#[tokio::test]
async fn activate_repoints_current_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    let now = Utc::now();
    let r1 = ReleaseId::generate(now);
    let r2 = ReleaseId::disambiguate(now, &[r1.clone()]);
    let p1 = release::create_release_dir(&exec, &layout, &r1).await.unwrap();
    let p2 = release::create_release_dir(&exec, &layout, &r2).await.unwrap();

    release::activate(&exec, &layout, &p1).await.unwrap();
    let current = std::fs::read_link(layout.current_link()).unwrap();
    assert_eq!(current.to_string_lossy(), p1);

    // Swapping to another release replaces the link, never removes it first.
    release::activate(&exec, &layout, &p2).await.unwrap();
    let current = std::fs::read_link(layout.current_link()).unwrap();
    assert_eq!(current.to_string_lossy(), p2);

    assert_eq!(
        release::current_release(&exec, &layout).await.unwrap(),
        Some(r2)
    );
}

#[tokio::test]
async fn list_releases_is_newest_first_and_skips_foreign_entries() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    let base = Utc::now();
    let mut ids = Vec::new();
    for i in 0..3 {
        let id = ReleaseId::generate(base + Duration::seconds(i));
        release::create_release_dir(&exec, &layout, &id).await.unwrap();
        ids.push(id);
    }
    // Not a release id; must be ignored.
    std::fs::create_dir(format!("{}/not-a-release", layout.releases_dir())).unwrap();

    let listed = release::list_releases(&exec, &layout).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0], ids[2]);
    assert_eq!(listed[2], ids[0]);
}

#[tokio::test]
async fn prune_keeps_newest_and_never_the_current_target() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    let base = Utc::now();
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = ReleaseId::generate(base + Duration::seconds(i));
        release::create_release_dir(&exec, &layout, &id).await.unwrap();
        ids.push(id);
    }

    // Activate the OLDEST release, as after a rollback.
    let oldest_path = layout.release_path(&ids[0]);
    release::activate(&exec, &layout, &oldest_path).await.unwrap();

    let removed = release::prune(&exec, &layout, 2, &[]).await.unwrap();

    // Kept: the 2 newest plus the active one, despite its age rank.
    let remaining = release::list_releases(&exec, &layout).await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.contains(&ids[0]));
    assert!(remaining.contains(&ids[4]));
    assert!(remaining.contains(&ids[3]));
    assert_eq!(removed.len(), 2);
    assert!(std::path::Path::new(&oldest_path).is_dir());
}

#[tokio::test]
async fn prune_respects_protected_releases() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    let base = Utc::now();
    let mut ids = Vec::new();
    for i in 0..4 {
        let id = ReleaseId::generate(base + Duration::seconds(i));
        release::create_release_dir(&exec, &layout, &id).await.unwrap();
        ids.push(id);
    }

    let protected = vec![ids[0].clone()];
    release::prune(&exec, &layout, 1, &protected).await.unwrap();

    let remaining = release::list_releases(&exec, &layout).await.unwrap();
    assert!(remaining.contains(&ids[0]), "protected release must survive");
    assert!(remaining.contains(&ids[3]), "newest release must survive");
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn verify_releases_reports_missing_paths() {
    let dir = tempfile::tempdir().unwrap();
    let exec = LocalExecutor::new();
    let layout = layout(&dir);

    let id = ReleaseId::generate(Utc::now());
    let existing = release::create_release_dir(&exec, &layout, &id).await.unwrap();
    let gone = layout.release_path(&ReleaseId::generate(Utc::now() + Duration::seconds(5)));

    let missing = release::verify_releases(&exec, &[existing.clone(), gone.clone()])
        .await
        .unwrap();
    assert_eq!(missing, vec![gone]);
}
