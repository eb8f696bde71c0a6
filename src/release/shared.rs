// ABOUTME: Shared-path linking so persistent data survives across releases.
// ABOUTME: Seeds shared/ entries, then replaces release paths with symlinks.

use super::{Error, Layout, Result};
use crate::exec::{Executor, quote};

/// Idempotently create the `shared/` directory.
pub async fn ensure_shared_dir<E: Executor + ?Sized>(exec: &E, layout: &Layout) -> Result<()> {
    let dir = layout.shared_dir();
    let output = exec.exec(&format!("mkdir -p {}", quote(&dir))).await?;
    if !output.success() {
        return Err(Error::CreateFailed {
            path: dir,
            detail: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Link the configured shared paths into a release directory.
///
/// For each relative path: if no entry exists yet under `shared/`, it is
/// seeded by moving the release's copy (first deploy), falling back to the
/// previous live copy under `current`, and finally to an empty file or
/// directory. The path inside the release is then unconditionally replaced
/// with a symlink into `shared/` — the shared copy wins even when the
/// checkout also ships one.
///
/// Must run before the release script: anything the script writes to a
/// shared path has to land in `shared/`, not in the ephemeral release copy.
pub async fn link_shared_paths<E: Executor + ?Sized>(
    exec: &E,
    layout: &Layout,
    release_path: &str,
    paths: &[String],
) -> Result<()> {
    ensure_shared_dir(exec, layout).await?;

    for rel in paths {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            continue;
        }

        let shared_entry = format!("{}/{}", layout.shared_dir(), rel);
        let release_entry = format!("{}/{}", release_path, rel);
        let previous_entry = format!("{}/{}", layout.current_link(), rel);

        // Parent directories on both sides.
        let script = format!(
            concat!(
                "mkdir -p \"$(dirname {shared})\" \"$(dirname {release})\" && ",
                "if [ ! -e {shared} ]; then ",
                "if [ -e {release} ]; then mv {release} {shared}; ",
                "elif [ -e {previous} ]; then cp -a {previous} {shared}; ",
                // Trailing-slash-free heuristic: a dotted final segment is a file.
                "elif [ \"{is_file}\" = yes ]; then touch {shared}; ",
                "else mkdir -p {shared}; fi; ",
                "fi && ",
                "rm -rf {release} && ln -s {shared} {release}"
            ),
            shared = quote(&shared_entry),
            release = quote(&release_entry),
            previous = quote(&previous_entry),
            is_file = if looks_like_file(rel) { "yes" } else { "no" },
        );

        let output = exec.exec(&script).await?;
        if !output.success() {
            return Err(Error::LinkFailed {
                path: rel.to_string(),
                detail: output.stderr.trim().to_string(),
            });
        }
    }

    Ok(())
}

/// Relax permissions on the configured writable paths.
///
/// Best-effort: single-user hosts don't need the separation, so failures are
/// logged and swallowed.
pub async fn apply_writable_permissions<E: Executor + ?Sized>(
    exec: &E,
    release_path: &str,
    paths: &[String],
) {
    for rel in paths {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            continue;
        }

        let target = format!("{}/{}", release_path, rel);
        let cmd = format!("chmod -R ug+rwX {} 2>/dev/null", quote(&target));
        match exec.exec(&cmd).await {
            Ok(output) if !output.success() => {
                tracing::warn!("failed to relax permissions on {}", target);
            }
            Err(e) => {
                tracing::warn!("failed to relax permissions on {}: {}", target, e);
            }
            _ => {}
        }
    }
}

/// A shared path with a dotted final segment is seeded as a file,
/// anything else as a directory.
fn looks_like_file(rel: &str) -> bool {
    rel.rsplit('/')
        .next()
        .map(|name| name.contains('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_looks_like_file() {
        assert!(looks_like_file(".env"));
        assert!(looks_like_file("config/secrets.json"));
    }

    #[test]
    fn storage_dir_looks_like_directory() {
        assert!(!looks_like_file("storage"));
        assert!(!looks_like_file("var/uploads"));
    }
}
