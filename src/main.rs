// ABOUTME: Entry point for the skala CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use skala::config::{self, AppConfig};
use skala::deploy::DeploymentStatus;
use skala::error::{Error, Result};
use skala::events::{LogPublisher, StreamEvent};
use skala::exec::{Executor, LocalExecutor, SshExecutor};
use skala::ssh::{Session, SessionConfig};
use skala::store::{MemoryStore, Store};
use skala::types::DeploymentId;
use skala::worker::Dispatcher;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Deployment history kept next to the manifest.
const STATE_FILE: &str = ".skala/state.json";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init {
            app,
            repository,
            force,
        } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, app.as_deref(), repository.as_deref(), force)
        }
        Commands::Deploy { commit } => {
            let cwd = env::current_dir()?;
            let config = AppConfig::discover(&cwd)?;
            deploy(&cwd, config, commit).await
        }
        Commands::Rollback { to } => {
            let cwd = env::current_dir()?;
            let config = AppConfig::discover(&cwd)?;
            rollback(&cwd, config, to).await
        }
        Commands::Releases => {
            let cwd = env::current_dir()?;
            let config = AppConfig::discover(&cwd)?;
            releases(&cwd, config).await
        }
        Commands::Log { deployment } => {
            let cwd = env::current_dir()?;
            print_log(&cwd, &deployment).await
        }
    }
}

fn state_path(cwd: &Path) -> PathBuf {
    cwd.join(STATE_FILE)
}

fn load_store(cwd: &Path) -> Result<Arc<MemoryStore>> {
    MemoryStore::load(&state_path(cwd))
        .map(Arc::new)
        .map_err(|e| Error::Store(e.to_string()))
}

/// Connect to the configured target: SSH for a remote host, the local shell
/// when no server is configured.
async fn connect_executor(config: &AppConfig) -> Result<Arc<dyn Executor>> {
    match &config.server {
        None => Ok(Arc::new(LocalExecutor::new())),
        Some(server) => {
            let user = server.user.clone().unwrap_or_else(|| {
                env::var("USER").unwrap_or_else(|_| "root".to_string())
            });

            let mut ssh_config = SessionConfig::new(&server.host, &user)
                .port(server.port)
                .trust_on_first_use(server.trust_first_connection)
                .command_timeout(config.deploy_timeout);
            if let Some(key) = &server.key_path {
                ssh_config = ssh_config.key_path(key);
            }

            println!("  → Connecting to {}...", server.host);
            let session = Session::connect(ssh_config)
                .await
                .map_err(|e| Error::Ssh(e.to_string()))?;
            Ok(Arc::new(SshExecutor::new(session)))
        }
    }
}

/// Deploy the configured application.
async fn deploy(cwd: &Path, config: AppConfig, commit: Option<String>) -> Result<()> {
    let store = load_store(cwd)?;
    let store_dyn: Arc<dyn Store> = store.clone();
    let publisher = Arc::new(LogPublisher::new(Arc::clone(&store_dyn)));
    let dispatcher = Dispatcher::new(Arc::clone(&store_dyn), Arc::clone(&publisher), 2);

    // Records whose worker died in an earlier run must not stay running.
    let swept = dispatcher
        .sweep_stale(config.deploy_timeout)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    if swept > 0 {
        println!("  → Marked {swept} abandoned deployment(s) as failed");
    }

    println!(
        "Deploying {} ({}, {} branch)",
        config.app, config.repository, config.branch
    );

    let executor = connect_executor(&config).await?;
    let id = dispatcher
        .dispatch_deploy(config, executor, commit)
        .await
        .map_err(|e| Error::Deploy(e.to_string()))?;

    let status = watch(&publisher, &store_dyn, &id).await?;

    dispatcher.shutdown().await;
    store
        .save(&state_path(cwd))
        .map_err(|e| Error::Store(e.to_string()))?;

    match status {
        DeploymentStatus::Success => {
            println!("  ✓ Deployment {id} succeeded");
            Ok(())
        }
        _ => Err(Error::Deploy(format!(
            "deployment {id} failed; run `skala log {id}` for details"
        ))),
    }
}

/// Roll back to the previous release, or to a specific deployment.
async fn rollback(cwd: &Path, config: AppConfig, to: Option<String>) -> Result<()> {
    let store = load_store(cwd)?;
    let store_dyn: Arc<dyn Store> = store.clone();
    let publisher = Arc::new(LogPublisher::new(Arc::clone(&store_dyn)));
    let dispatcher = Dispatcher::new(Arc::clone(&store_dyn), Arc::clone(&publisher), 1);

    println!("Rolling back {}", config.app);

    let executor = connect_executor(&config).await?;
    let target = to.map(DeploymentId::new);
    let id = dispatcher
        .dispatch_rollback(config, executor, target)
        .await
        .map_err(|e| Error::Deploy(e.to_string()))?;

    let status = watch(&publisher, &store_dyn, &id).await?;

    dispatcher.shutdown().await;
    store
        .save(&state_path(cwd))
        .map_err(|e| Error::Store(e.to_string()))?;

    match status {
        DeploymentStatus::Success => {
            println!("  ✓ Rollback {id} succeeded");
            Ok(())
        }
        _ => Err(Error::Deploy(format!(
            "rollback {id} failed; run `skala log {id}` for details"
        ))),
    }
}

/// Follow a deployment's event stream until it completes, printing log
/// chunks. The persisted log is replayed first; chunks already inside the
/// replayed prefix are skipped by offset.
async fn watch(
    publisher: &Arc<LogPublisher>,
    store: &Arc<dyn Store>,
    id: &DeploymentId,
) -> Result<DeploymentStatus> {
    let (offset, mut rx) = publisher
        .subscribe(id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

    let record = store
        .deployment(id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    let mut printed = offset;
    print!("{}", &record.log[..offset.min(record.log.len())]);

    // The run may already have finished before we subscribed; the completion
    // event is gone, but the terminal status is in the store.
    if record.status.is_terminal() {
        if record.log.len() > printed {
            print!("{}", &record.log[printed..]);
        }
        return Ok(record.status);
    }

    loop {
        match rx.recv().await {
            Ok(StreamEvent::Log { chunk, offset }) => {
                if offset > printed {
                    println!("{chunk}");
                    printed = offset;
                }
            }
            Ok(StreamEvent::Complete { status }) => return Ok(status),
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {
                // Fell behind the broadcast buffer: catch up from the
                // persisted log instead.
                let record = store
                    .deployment(id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                if record.log.len() > printed {
                    print!("{}", &record.log[printed..]);
                    printed = record.log.len();
                }
            }
            Err(RecvError::Closed) => {
                // Publisher retired the topic; final status is in the store.
                let record = store
                    .deployment(id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                return Ok(record.status);
            }
        }
    }
}

/// List deployments with their releases.
async fn releases(cwd: &Path, config: AppConfig) -> Result<()> {
    let store = load_store(cwd)?;
    let records = store
        .deployments_for(&config.app)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

    if records.is_empty() {
        println!("No deployments recorded for {}", config.app);
        return Ok(());
    }

    for record in records {
        let marker = if record.is_active { "*" } else { " " };
        let release = record
            .release_id
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let commit = record.commit_hash.as_deref().unwrap_or("-");
        let commit = if commit.len() >= 8 { &commit[..8] } else { commit };
        println!(
            "{marker} {}  {:?}  {}  release={release}  commit={commit}",
            record.id, record.kind, record.status
        );
    }
    Ok(())
}

/// Print the persisted log of one deployment.
async fn print_log(cwd: &Path, deployment: &str) -> Result<()> {
    let store = load_store(cwd)?;
    let record = store
        .deployment(&DeploymentId::new(deployment))
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    print!("{}", record.log);
    Ok(())
}
