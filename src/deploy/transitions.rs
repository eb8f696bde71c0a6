// ABOUTME: State transition methods for the release workflow.
// ABOUTME: Each method consumes self and returns the next state on success.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::exec::{ExecError, Executor, LineSink, quote};
use crate::release;
use crate::types::ReleaseId;

use super::Deployment;
use super::error::DeployError;
use super::state::{
    Activated, Built, CommitInfo, Completed, Initialized, ReleaseCreated, SharedLinked,
    SourceFetched,
};

// =============================================================================
// Initialized -> ReleaseCreated
// =============================================================================

impl Deployment<Initialized> {
    /// Create the directory for a new release.
    ///
    /// Generates a timestamp release id for `at`, disambiguated against the
    /// releases already on disk, and creates `releases/<id>`.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the layout or release directory cannot
    /// be created.
    #[must_use = "deployment state must be used"]
    pub async fn create_release<E: Executor + ?Sized>(
        self,
        exec: &E,
        at: DateTime<Utc>,
    ) -> Result<Deployment<ReleaseCreated>, DeployError> {
        release::ensure_layout(exec, &self.layout).await?;

        let existing = release::list_releases(exec, &self.layout).await?;
        let release_id = ReleaseId::disambiguate(at, &existing);
        let release_path = release::create_release_dir(exec, &self.layout, &release_id).await?;

        Ok(Deployment {
            config: self.config,
            layout: self.layout,
            state: ReleaseCreated {
                release_id,
                release_path,
            },
        })
    }
}

// =============================================================================
// ReleaseCreated -> SourceFetched
// =============================================================================

impl Deployment<ReleaseCreated> {
    /// Clone the repository branch into the release directory and check out
    /// the requested commit, or the branch head when no commit is given.
    ///
    /// # Errors
    ///
    /// Returns a remote execution error when git fails; the empty release
    /// directory is left in place for inspection.
    #[must_use = "deployment state must be used"]
    pub async fn fetch_source<E: Executor + ?Sized>(
        self,
        exec: &E,
        commit: Option<&str>,
    ) -> Result<Deployment<SourceFetched>, DeployError> {
        let path = &self.state.release_path;

        // A pinned commit needs history; a branch head clone can be shallow.
        let clone_cmd = match commit {
            Some(commit) => format!(
                "git clone --branch {} {} {} 2>&1 && git -C {} checkout --detach {} 2>&1",
                quote(&self.config.branch),
                quote(&self.config.repository),
                quote(path),
                quote(path),
                quote(commit),
            ),
            None => format!(
                "git clone --depth 1 --branch {} {} {} 2>&1",
                quote(&self.config.branch),
                quote(&self.config.repository),
                quote(path),
            ),
        };

        let output = exec.exec(&clone_cmd).await?;
        if !output.success() {
            return Err(ExecError::CommandFailed(format!(
                "git checkout failed: {}",
                output.stdout.trim()
            ))
            .into());
        }

        let commit = describe_head(exec, path).await?;

        Ok(Deployment {
            config: self.config,
            layout: self.layout,
            state: SourceFetched {
                release_id: self.state.release_id,
                release_path: self.state.release_path,
                commit,
            },
        })
    }
}

/// Read the hash and subject line of HEAD in a checkout.
async fn describe_head<E: Executor + ?Sized>(
    exec: &E,
    path: &str,
) -> Result<CommitInfo, DeployError> {
    let cmd = format!(
        "git -C {} rev-parse HEAD && git -C {} log -1 --pretty=%s",
        quote(path),
        quote(path)
    );
    let output = exec.exec(&cmd).await?;
    if !output.success() {
        return Err(ExecError::CommandFailed(format!(
            "failed to read HEAD: {}",
            output.stderr.trim()
        ))
        .into());
    }

    let mut lines = output.stdout.lines();
    let hash = lines.next().unwrap_or_default().trim().to_string();
    let message = lines.next().unwrap_or_default().trim().to_string();
    Ok(CommitInfo { hash, message })
}

// =============================================================================
// SourceFetched -> SharedLinked
// =============================================================================

impl Deployment<SourceFetched> {
    /// Link the configured shared paths into the release and relax
    /// permissions on writable paths.
    ///
    /// Runs strictly before the deploy script so the script already writes
    /// through the symlinks into `shared/`.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if linking fails. Permission failures are
    /// logged and swallowed.
    #[must_use = "deployment state must be used"]
    pub async fn link_shared<E: Executor + ?Sized>(
        self,
        exec: &E,
    ) -> Result<Deployment<SharedLinked>, DeployError> {
        release::link_shared_paths(
            exec,
            &self.layout,
            &self.state.release_path,
            &self.config.shared_paths(),
        )
        .await?;

        release::apply_writable_permissions(
            exec,
            &self.state.release_path,
            &self.config.writable_paths(),
        )
        .await;

        Ok(Deployment {
            config: self.config,
            layout: self.layout,
            state: SharedLinked {
                release_id: self.state.release_id,
                release_path: self.state.release_path,
                commit: self.state.commit,
            },
        })
    }
}

// =============================================================================
// SharedLinked -> Built
// =============================================================================

impl Deployment<SharedLinked> {
    /// Run the rendered deploy script inside the release directory,
    /// streaming each output line to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptFailed` on a non-zero exit; the release directory is
    /// left in place for postmortem inspection.
    #[must_use = "deployment state must be used"]
    pub async fn run_script<E: Executor + ?Sized>(
        self,
        exec: &E,
        script: &str,
        timeout: Duration,
        sink: LineSink,
    ) -> Result<Deployment<Built>, DeployError> {
        let command = format!(
            "set -e\ncd {}\n{}",
            quote(&self.state.release_path),
            script
        );

        let output = exec.exec_streamed(&command, timeout, sink).await?;
        if !output.success() {
            return Err(DeployError::ScriptFailed {
                exit_code: output.exit_code,
            });
        }

        Ok(Deployment {
            config: self.config,
            layout: self.layout,
            state: Built {
                release_id: self.state.release_id,
                release_path: self.state.release_path,
                commit: self.state.commit,
            },
        })
    }
}

// =============================================================================
// Built -> Activated
// =============================================================================

impl Deployment<Built> {
    /// Atomically repoint `current` at this release.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the symlink swap fails; `current` keeps
    /// its previous target in that case.
    #[must_use = "deployment state must be used"]
    pub async fn activate<E: Executor + ?Sized>(
        self,
        exec: &E,
    ) -> Result<Deployment<Activated>, DeployError> {
        release::activate(exec, &self.layout, &self.state.release_path).await?;

        Ok(Deployment {
            config: self.config,
            layout: self.layout,
            state: Activated {
                release_id: self.state.release_id,
                release_path: self.state.release_path,
                commit: self.state.commit,
            },
        })
    }
}

// =============================================================================
// Activated -> Completed
// =============================================================================

impl Deployment<Activated> {
    /// Prune releases beyond the retention count.
    ///
    /// Best-effort: a pruning failure never demotes a successful deploy, so
    /// errors are logged and swallowed. Returns the pruned release ids.
    #[must_use = "deployment state must be used"]
    pub async fn cleanup<E: Executor + ?Sized>(
        self,
        exec: &E,
        keep: usize,
        protected: &[ReleaseId],
    ) -> (Deployment<Completed>, Vec<ReleaseId>) {
        let removed = match release::prune(exec, &self.layout, keep, protected).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("release pruning failed: {}", e);
                Vec::new()
            }
        };

        (
            Deployment {
                config: self.config,
                layout: self.layout,
                state: Completed {
                    release_id: self.state.release_id,
                    release_path: self.state.release_path,
                    commit: self.state.commit,
                },
            },
            removed,
        )
    }
}
