// ABOUTME: Deployment orchestration using the type state pattern.
// ABOUTME: Exports the workflow, orchestrator, rollback coordinator, and lock.

mod deployment;
mod error;
mod lock;
mod orchestrator;
pub mod record;
mod rollback;
pub mod script;
mod state;
mod transitions;

pub use deployment::Deployment;
pub use error::{DeployError, DeployErrorKind};
pub use lock::{DeployLock, LockInfo};
pub use orchestrator::{ActivationLocks, Orchestrator};
pub use record::{AppStatus, DeploymentKind, DeploymentRecord, DeploymentStatus};
pub use rollback::RollbackCoordinator;
pub use state::{
    Activated, Built, CommitInfo, Completed, Initialized, ReleaseCreated, SharedLinked,
    SourceFetched,
};
