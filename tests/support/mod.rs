// ABOUTME: Shared fixtures for integration tests.
// ABOUTME: Local git repos, unique app names, and a wired-up engine.

#![allow(dead_code)]

use skala::config::{AppConfig, AppType, Strategy};
use skala::deploy::{ActivationLocks, Orchestrator, RollbackCoordinator};
use skala::events::LogPublisher;
use skala::exec::LocalExecutor;
use skala::store::{MemoryStore, Store};
use skala::types::AppName;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static APP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// An app name unique across the test binary and across parallel test runs,
/// so deploy locks under $HOME never collide.
pub fn unique_app(prefix: &str) -> AppName {
    let n = APP_COUNTER.fetch_add(1, Ordering::Relaxed);
    AppName::new(&format!("{}-{}-{}", prefix, std::process::id(), n)).expect("valid app name")
}

/// Create a git repository with one commit containing `index.html`.
/// Returns the commit hash of HEAD.
pub fn git_fixture(dir: &Path) -> String {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "tests@example.com"]);
    git(dir, &["config", "user.name", "Tests"]);
    std::fs::write(dir.join("index.html"), "<h1>v1</h1>\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial release"]);
    head(dir)
}

/// Add a second commit to a fixture repository.
pub fn git_commit_change(dir: &Path, content: &str, message: &str) -> String {
    std::fs::write(dir.join("index.html"), content).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", message]);
    head(dir)
}

pub fn head(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .expect("git rev-parse should run");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git should be installed");
    assert!(status.success(), "git {:?} failed", args);
}

/// Config for deploying a fixture repository into a tempdir on this machine.
pub fn test_config(app: AppName, repo: &Path, deploy_path: &Path) -> AppConfig {
    let mut config = AppConfig::template();
    config.app = app;
    config.repository = repo.to_string_lossy().into_owned();
    config.branch = "main".to_string();
    config.app_type = AppType::Static;
    config.strategy = Strategy::Atomic;
    config.custom_deploy_path = Some(deploy_path.to_string_lossy().into_owned());
    config
}

/// The engine wired against an in-memory store and the local executor.
pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<LogPublisher>,
    pub orchestrator: Orchestrator,
    pub coordinator: RollbackCoordinator,
    pub exec: LocalExecutor,
}

impl Engine {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn Store> = store.clone();
        let publisher = Arc::new(LogPublisher::new(Arc::clone(&store_dyn)));
        let locks = Arc::new(ActivationLocks::default());
        let orchestrator = Orchestrator::new(
            Arc::clone(&store_dyn),
            Arc::clone(&publisher),
            Arc::clone(&locks),
        );
        let coordinator = RollbackCoordinator::new(store_dyn, Arc::clone(&publisher), locks);
        Self {
            store,
            publisher,
            orchestrator,
            coordinator,
            exec: LocalExecutor::new(),
        }
    }

    /// Prepare and run one deploy, returning the record id.
    pub async fn deploy(
        &self,
        config: &AppConfig,
        commit: Option<&str>,
    ) -> skala::types::DeploymentId {
        let id = self
            .orchestrator
            .prepare_deploy(config)
            .await
            .expect("prepare should succeed");
        self.orchestrator
            .run_deploy(&self.exec, config, &id, commit)
            .await;
        id
    }
}
