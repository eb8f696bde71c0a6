// ABOUTME: Persisted deployment and application records.
// ABOUTME: Status enums enforce that terminal states are final.

use crate::types::{AppName, DeploymentId, ReleaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a deployment record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    /// A forward deploy: fetch, build, activate.
    Deploy,
    /// A rollback: re-activate an existing release, no rebuild.
    Rollback,
}

/// Lifecycle status of a deployment record.
///
/// `Success` and `Failed` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Success) | (Running, Failed) | (Pending, Failed)
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One attempt to change an application's running code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub app: AppName,
    pub kind: DeploymentKind,
    pub status: DeploymentStatus,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    /// Set only for atomic-strategy deployments.
    pub release_id: Option<ReleaseId>,
    pub release_path: Option<String>,
    pub is_active: bool,
    /// For rollback records: the deployment whose release is re-activated.
    pub rollback_target: Option<DeploymentId>,
    /// Append-only log text, one timestamped line per entry.
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(id: DeploymentId, app: AppName, kind: DeploymentKind, at: DateTime<Utc>) -> Self {
        Self {
            id,
            app,
            kind,
            status: DeploymentStatus::Pending,
            commit_hash: None,
            commit_message: None,
            release_id: None,
            release_path: None,
            is_active: false,
            rollback_target: None,
            log: String::new(),
            created_at: at,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Health of an application as a deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    #[default]
    Ok,
    /// A rollback failed; the application may be serving a broken release.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_admit_no_transitions() {
        use DeploymentStatus::*;
        for next in [Pending, Running, Success, Failed] {
            assert!(!Success.can_transition(next));
            assert!(!Failed.can_transition(next));
        }
    }

    #[test]
    fn lifecycle_follows_pending_running_terminal() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition(Running));
        assert!(Running.can_transition(Success));
        assert!(Running.can_transition(Failed));
        assert!(!Pending.can_transition(Success));
        assert!(!Running.can_transition(Pending));
    }

    #[test]
    fn new_record_is_pending_and_inactive() {
        let record = DeploymentRecord::new(
            DeploymentId::new("d-1"),
            AppName::new("myapp").unwrap(),
            DeploymentKind::Deploy,
            Utc::now(),
        );
        assert_eq!(record.status, DeploymentStatus::Pending);
        assert!(!record.is_active);
        assert!(record.release_path.is_none());
    }
}
