// ABOUTME: Integration tests for shared-path seeding and linking.
// ABOUTME: Shared copies must survive releases and win over checkout copies.

mod support;

use skala::exec::LocalExecutor;
use skala::release::{self, Layout};
use std::path::Path;

fn setup(dir: &tempfile::TempDir) -> (LocalExecutor, Layout) {
    let layout = Layout::new(dir.path().join("app").to_string_lossy().into_owned());
    (LocalExecutor::new(), layout)
}

fn make_release(layout: &Layout, name: &str) -> String {
    let path = format!("{}/releases/{}", layout.base(), name);
    std::fs::create_dir_all(&path).unwrap();
    path
}

#[tokio::test]
async fn first_deploy_seeds_shared_from_release() {
    let dir = tempfile::tempdir().unwrap();
    let (exec, layout) = setup(&dir);

    let release = make_release(&layout, "20260101000000");
    std::fs::write(format!("{release}/.env"), "APP_KEY=secret\n").unwrap();

    release::link_shared_paths(&exec, &layout, &release, &[".env".to_string()])
        .await
        .unwrap();

    // Shared copy holds the seeded content; release entry is a symlink to it.
    let shared_env = format!("{}/.env", layout.shared_dir());
    assert_eq!(
        std::fs::read_to_string(&shared_env).unwrap(),
        "APP_KEY=secret\n"
    );
    let link = Path::new(&release).join(".env");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(std::fs::read_to_string(&link).unwrap(), "APP_KEY=secret\n");
}

#[tokio::test]
async fn existing_shared_copy_wins_over_checkout_copy() {
    let dir = tempfile::tempdir().unwrap();
    let (exec, layout) = setup(&dir);

    let r1 = make_release(&layout, "20260101000000");
    std::fs::write(format!("{r1}/.env"), "APP_KEY=original\n").unwrap();
    release::link_shared_paths(&exec, &layout, &r1, &[".env".to_string()])
        .await
        .unwrap();

    // Second release ships its own .env with different content.
    let r2 = make_release(&layout, "20260101000001");
    std::fs::write(format!("{r2}/.env"), "APP_KEY=from-checkout\n").unwrap();
    release::link_shared_paths(&exec, &layout, &r2, &[".env".to_string()])
        .await
        .unwrap();

    // The shared copy is authoritative, not last-writer-wins.
    let link = Path::new(&r2).join(".env");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(std::fs::read_to_string(&link).unwrap(), "APP_KEY=original\n");
}

#[tokio::test]
async fn missing_everywhere_creates_empty_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (exec, layout) = setup(&dir);

    let release = make_release(&layout, "20260101000000");
    release::link_shared_paths(
        &exec,
        &layout,
        &release,
        &[".env".to_string(), "storage".to_string()],
    )
    .await
    .unwrap();

    // Dotted name seeds a file, bare name a directory.
    assert!(Path::new(&format!("{}/.env", layout.shared_dir())).is_file());
    assert!(Path::new(&format!("{}/storage", layout.shared_dir())).is_dir());
}

#[tokio::test]
async fn nested_shared_paths_get_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let (exec, layout) = setup(&dir);

    let release = make_release(&layout, "20260101000000");
    release::link_shared_paths(
        &exec,
        &layout,
        &release,
        &["storage/app/uploads".to_string()],
    )
    .await
    .unwrap();

    assert!(Path::new(&format!("{}/storage/app/uploads", layout.shared_dir())).is_dir());
    let link = Path::new(&release).join("storage/app/uploads");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
}

#[tokio::test]
async fn writes_through_the_link_survive_into_a_new_release() {
    let dir = tempfile::tempdir().unwrap();
    let (exec, layout) = setup(&dir);

    let r1 = make_release(&layout, "20260101000000");
    release::link_shared_paths(&exec, &layout, &r1, &["storage".to_string()])
        .await
        .unwrap();

    // The application writes through the release's symlink.
    std::fs::write(format!("{r1}/storage/upload.txt"), "data").unwrap();

    let r2 = make_release(&layout, "20260101000001");
    release::link_shared_paths(&exec, &layout, &r2, &["storage".to_string()])
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(format!("{r2}/storage/upload.txt")).unwrap(),
        "data"
    );
}
