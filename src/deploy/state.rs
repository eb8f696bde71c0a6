// ABOUTME: Deployment state types for the type state pattern.
// ABOUTME: State types carry their own data for compile-time guarantees.

use crate::types::ReleaseId;

/// Commit information captured after checkout.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

/// Initial state: layout known, nothing created yet.
/// Available actions: `create_release()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Initialized;

/// Release directory created, empty.
/// Available actions: `fetch_source()`
#[derive(Debug, Clone)]
pub struct ReleaseCreated {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
}

/// Source checked out into the release directory.
/// Available actions: `link_shared()`
#[derive(Debug, Clone)]
pub struct SourceFetched {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
    pub(crate) commit: CommitInfo,
}

/// Shared paths linked into the release.
/// Available actions: `run_script()`
#[derive(Debug, Clone)]
pub struct SharedLinked {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
    pub(crate) commit: CommitInfo,
}

/// Deploy script ran successfully.
/// Available actions: `activate()`
#[derive(Debug, Clone)]
pub struct Built {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
    pub(crate) commit: CommitInfo,
}

/// Release is live behind `current`.
/// Available actions: `cleanup()`
#[derive(Debug, Clone)]
pub struct Activated {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
    pub(crate) commit: CommitInfo,
}

/// Terminal state: activated and pruned.
#[derive(Debug, Clone)]
pub struct Completed {
    pub(crate) release_id: ReleaseId,
    pub(crate) release_path: String,
    pub(crate) commit: CommitInfo,
}
