// ABOUTME: Deploy lock to prevent concurrent deployments of the same application.
// ABOUTME: Uses atomic file creation with lock info stored in ~/.local/state/skala/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exec::Executor;
use crate::types::AppName;

use super::error::{DeployError, LockHeldSnafu, LockSnafu};

/// Base directory for skala state files on the target host.
const STATE_DIR: &str = ".local/state/skala";

fn lock_error(message: impl Into<String>) -> DeployError {
    LockSnafu {
        message: message.into(),
    }
    .build()
}

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Application being deployed.
    pub app: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(app: &AppName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
            app: app.to_string(),
        }
    }

    /// Check if this lock is stale (older than 1 hour).
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.acquired_at;
        age.num_hours() >= 1
    }

    /// Path to the lock file for an application.
    /// Uses $HOME for shell expansion compatibility.
    pub fn lock_path(app: &AppName) -> String {
        format!("$HOME/{}/{}.lock", STATE_DIR, app)
    }
}

/// A held deploy lock, scoped to one application on one host.
///
/// Held for the whole orchestration run, so a second dispatch for the same
/// application fails fast instead of racing the first on `releases/`.
pub struct DeployLock<'a, E: Executor + ?Sized> {
    exec: &'a E,
    app: AppName,
}

impl<E: Executor + ?Sized> std::fmt::Debug for DeployLock<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock").field("app", &self.app).finish()
    }
}

impl<'a, E: Executor + ?Sized> DeployLock<'a, E> {
    /// Acquire the deploy lock for the given application.
    ///
    /// Uses shell noclobber mode for atomic lock acquisition (no TOCTOU race).
    /// Returns an error if the lock is already held by another process.
    /// Auto-breaks stale locks (>1 hour) with a warning.
    pub async fn acquire(exec: &'a E, app: &AppName, force: bool) -> Result<Self, DeployError> {
        let lock_path = LockInfo::lock_path(app);

        Self::ensure_state_dir(exec).await?;

        let lock_info = LockInfo::new(app);
        let lock_json = serde_json::to_string(&lock_info)
            .map_err(|e| lock_error(format!("failed to serialize lock: {}", e)))?;
        let escaped_json = lock_json.replace('\'', "'\\''");

        // set -C makes > fail if the file already exists (atomic
        // create-if-not-exists). Double quotes on the path expand $HOME,
        // single quotes protect the JSON.
        let acquire_cmd = format!(
            "(set -C; echo '{}' > \"{}\") 2>/dev/null",
            escaped_json, lock_path
        );

        let result = exec
            .exec(&acquire_cmd)
            .await
            .map_err(|e| lock_error(format!("failed to acquire lock: {}", e)))?;

        if result.success() {
            return Ok(Self {
                exec,
                app: app.clone(),
            });
        }

        // Lock acquisition failed - check if existing lock should be broken
        let should_break = Self::check_existing_lock(exec, &lock_path, force).await?;

        if !should_break {
            // Lock is valid and held by someone else
            let output = exec.exec(&format!("cat \"{}\"", lock_path)).await;
            if let Ok(output) = output
                && let Ok(existing) = serde_json::from_str::<LockInfo>(&output.stdout)
            {
                return LockHeldSnafu {
                    holder: existing.holder,
                    pid: existing.pid,
                    since: existing.acquired_at,
                }
                .fail();
            }
            return Err(lock_error("lock held by another process"));
        }

        // Break the lock and retry
        tracing::debug!("Removing stale/forced lock at {}", lock_path);
        let _ = exec.exec(&format!("rm -f \"{}\"", lock_path)).await;

        let result = exec
            .exec(&acquire_cmd)
            .await
            .map_err(|e| lock_error(format!("failed to acquire lock: {}", e)))?;

        if !result.success() {
            return Err(lock_error("lock acquired by another process during break"));
        }

        Ok(Self {
            exec,
            app: app.clone(),
        })
    }

    /// Ensure the state directory exists on the target host.
    async fn ensure_state_dir(exec: &E) -> Result<(), DeployError> {
        let cmd = format!("mkdir -p ~/{}", STATE_DIR);
        let output = exec
            .exec(&cmd)
            .await
            .map_err(|e| lock_error(format!("failed to create state directory: {}", e)))?;

        if !output.success() {
            return Err(lock_error(format!(
                "failed to create state directory: {}",
                output.stderr
            )));
        }
        Ok(())
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    async fn check_existing_lock(
        exec: &E,
        lock_path: &str,
        force: bool,
    ) -> Result<bool, DeployError> {
        let output = exec
            .exec(&format!("cat \"{}\"", lock_path))
            .await
            .map_err(|e| lock_error(format!("failed to read lock info: {}", e)))?;

        if !output.success() {
            // Can't read lock info - corrupted or doesn't exist, break it
            tracing::warn!("Lock info unreadable, breaking lock");
            return Ok(true);
        }

        match serde_json::from_str::<LockInfo>(&output.stdout) {
            Ok(existing_lock) => {
                if force {
                    tracing::warn!(
                        "Breaking lock held by {} (pid {}) since {}",
                        existing_lock.holder,
                        existing_lock.pid,
                        existing_lock.acquired_at
                    );
                    Ok(true)
                } else if existing_lock.is_stale() {
                    tracing::warn!(
                        "Auto-breaking stale lock held by {} (pid {}) since {}",
                        existing_lock.holder,
                        existing_lock.pid,
                        existing_lock.acquired_at
                    );
                    Ok(true)
                } else {
                    // Lock is active and valid
                    Ok(false)
                }
            }
            Err(_) => {
                // Lock info corrupted, break it
                tracing::warn!("Lock info corrupted, breaking lock");
                Ok(true)
            }
        }
    }

    /// Release the lock.
    pub async fn release(self) -> Result<(), DeployError> {
        let lock_path = LockInfo::lock_path(&self.app);
        let _ = self.exec.exec(&format!("rm -f \"{}\"", lock_path)).await;
        Ok(())
    }
}
