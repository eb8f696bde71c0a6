// ABOUTME: Release directory lifecycle on the deployment target.
// ABOUTME: Exports the layout, manager operations, and shared-path linker.

mod error;
mod manager;
mod shared;

pub use error::{Error, Result};
pub use manager::{
    activate, create_release_dir, current_release, ensure_layout, list_releases, prune,
    verify_releases,
};
pub use shared::{apply_writable_permissions, ensure_shared_dir, link_shared_paths};

use crate::types::ReleaseId;

/// Directory layout under one application's deploy path.
///
/// ```text
/// <base>/
///   releases/<release_id>/   one checked-out copy per deploy attempt
///   shared/                  data surviving across releases
///   current -> releases/<id> the live release
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    base: String,
}

impl Layout {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.len() > 1 && base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn releases_dir(&self) -> String {
        format!("{}/releases", self.base)
    }

    pub fn shared_dir(&self) -> String {
        format!("{}/shared", self.base)
    }

    pub fn current_link(&self) -> String {
        format!("{}/current", self.base)
    }

    pub fn release_path(&self, id: &ReleaseId) -> String {
        format!("{}/releases/{}", self.base, id)
    }
}
