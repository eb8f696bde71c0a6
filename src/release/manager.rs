// ABOUTME: Release directory lifecycle: create, activate, list, prune.
// ABOUTME: Activation is an atomic symlink rename; pruning is best-effort.

use super::{Error, Layout, Result};
use crate::exec::{Executor, quote};
use crate::types::ReleaseId;

/// Idempotently create the `releases/` and `shared/` skeleton under the
/// deploy path.
pub async fn ensure_layout<E: Executor + ?Sized>(exec: &E, layout: &Layout) -> Result<()> {
    let cmd = format!(
        "mkdir -p {} {}",
        quote(&layout.releases_dir()),
        quote(&layout.shared_dir())
    );
    let output = exec.exec(&cmd).await?;
    if !output.success() {
        return Err(Error::CreateFailed {
            path: layout.base().to_string(),
            detail: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Create the directory for a new release.
///
/// Fails if the directory already exists; a release directory is owned by
/// exactly one deployment attempt.
pub async fn create_release_dir<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
    id: &ReleaseId,
) -> Result<String> {
    let path = layout.release_path(id);

    // Plain mkdir (not -p) so an existing directory is an error.
    let cmd = format!(
        "mkdir -p {} && mkdir {}",
        quote(&layout.releases_dir()),
        quote(&path)
    );
    let output = exec.exec(&cmd).await?;
    if !output.success() {
        if output.stderr.contains("File exists") {
            return Err(Error::ReleaseExists(path));
        }
        return Err(Error::CreateFailed {
            path,
            detail: output.stderr.trim().to_string(),
        });
    }
    Ok(path)
}

/// Atomically repoint `current` at the given release path.
///
/// The swap is a symlink created under a temporary name and renamed over
/// `current` with `mv -T`. Rename is atomic on POSIX filesystems, so there is
/// never a moment where `current` resolves to nothing.
pub async fn activate<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
    release_path: &str,
) -> Result<()> {
    let current = layout.current_link();
    let staging = format!("{}.staging", current);

    let cmd = format!(
        "ln -sfn {} {} && mv -T {} {}",
        quote(release_path),
        quote(&staging),
        quote(&staging),
        quote(&current)
    );
    let output = exec.exec(&cmd).await?;
    if !output.success() {
        return Err(Error::ActivateFailed {
            path: release_path.to_string(),
            detail: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// List release ids under `releases/`, newest first.
///
/// Directory entries that don't parse as release ids are ignored; they are
/// not ours to manage.
pub async fn list_releases<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
) -> Result<Vec<ReleaseId>> {
    let dir = layout.releases_dir();
    let cmd = format!("ls -1 {} 2>/dev/null || true", quote(&dir));
    let output = exec.exec(&cmd).await?;
    if !output.success() {
        return Err(Error::ListFailed {
            path: dir,
            detail: output.stderr.trim().to_string(),
        });
    }

    let mut ids: Vec<ReleaseId> = output
        .stdout
        .lines()
        .filter_map(|line| ReleaseId::parse(line.trim()).ok())
        .collect();
    ids.sort();
    ids.reverse();
    Ok(ids)
}

/// Resolve the release id `current` points at, if any.
pub async fn current_release<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
) -> Result<Option<ReleaseId>> {
    let cmd = format!("readlink {} 2>/dev/null || true", quote(&layout.current_link()));
    let output = exec.exec(&cmd).await?;

    let target = output.stdout.trim();
    if target.is_empty() {
        return Ok(None);
    }

    let name = target.rsplit('/').next().unwrap_or(target);
    Ok(ReleaseId::parse(name).ok())
}

/// Delete releases beyond the `keep` newest.
///
/// The release `current` points at and any id in `protected` are never
/// deleted, whatever their age rank. Individual deletion failures are logged
/// and swallowed; pruning must never turn a successful deploy into a failure.
/// Returns the ids that were actually removed.
pub async fn prune<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
    keep: usize,
    protected: &[ReleaseId],
) -> Result<Vec<ReleaseId>> {
    let releases = list_releases(exec, layout).await?;
    let active = current_release(exec, layout).await?;

    let mut removed = Vec::new();
    for id in releases.iter().skip(keep) {
        if Some(id) == active.as_ref() || protected.contains(id) {
            continue;
        }

        let path = layout.release_path(id);
        let cmd = format!("rm -rf {}", quote(&path));
        match exec.exec(&cmd).await {
            Ok(output) if output.success() => removed.push(id.clone()),
            Ok(output) => {
                tracing::warn!(
                    "failed to prune release {}: {}",
                    path,
                    output.stderr.trim()
                );
            }
            Err(e) => {
                tracing::warn!("failed to prune release {}: {}", path, e);
            }
        }
    }

    Ok(removed)
}

/// Report which of the given release paths no longer exist on the host.
///
/// Database rows and release directories are correlated by path only, so
/// callers reconcile the two before trusting a stored `release_path`.
pub async fn verify_releases<E: Executor + ?Sized>(
    exec: &E,
    paths: &[String],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for path in paths {
        let cmd = format!("test -d {} && echo exists || true", quote(path));
        let output = exec.exec(&cmd).await?;
        if output.stdout.trim() != "exists" {
            missing.push(path.clone());
        }
    }
    Ok(missing)
}
