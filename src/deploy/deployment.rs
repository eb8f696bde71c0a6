// ABOUTME: Generic release workflow struct parameterized by state marker.
// ABOUTME: State types carry their own data for compile-time guarantees.

use crate::config::AppConfig;
use crate::release::Layout;
use crate::types::{AppName, ReleaseId};

use super::state::{
    Activated, Built, CommitInfo, Completed, Initialized, ReleaseCreated, SharedLinked,
    SourceFetched,
};

/// A release workflow in progress, parameterized by its current state.
///
/// The state type parameter `S` carries state-specific data (release path,
/// commit info) directly in the state type, so a step that needs a checked-out
/// release cannot be called before the checkout happened.
#[derive(Debug)]
pub struct Deployment<S> {
    pub(crate) config: AppConfig,
    pub(crate) layout: Layout,
    pub(crate) state: S,
}

impl Deployment<Initialized> {
    /// Start a workflow for an application.
    pub fn new(config: AppConfig) -> Self {
        let layout = Layout::new(config.deploy_path());
        Deployment {
            config,
            layout,
            state: Initialized,
        }
    }
}

impl<S> Deployment<S> {
    /// Get the application name from config.
    pub fn app(&self) -> &AppName {
        &self.config.app
    }

    /// Get the directory layout under the deploy path.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Get the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

// State-specific accessors.

macro_rules! release_accessors {
    ($state:ty) => {
        impl Deployment<$state> {
            /// Get the release id of this workflow's release directory.
            pub fn release_id(&self) -> &ReleaseId {
                &self.state.release_id
            }

            /// Get the path of this workflow's release directory.
            pub fn release_path(&self) -> &str {
                &self.state.release_path
            }
        }
    };
}

release_accessors!(ReleaseCreated);
release_accessors!(SourceFetched);
release_accessors!(SharedLinked);
release_accessors!(Built);
release_accessors!(Activated);
release_accessors!(Completed);

macro_rules! commit_accessor {
    ($state:ty) => {
        impl Deployment<$state> {
            /// Get the commit checked out into the release.
            pub fn commit(&self) -> &CommitInfo {
                &self.state.commit
            }
        }
    };
}

commit_accessor!(SourceFetched);
commit_accessor!(SharedLinked);
commit_accessor!(Built);
commit_accessor!(Activated);
commit_accessor!(Completed);
