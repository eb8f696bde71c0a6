// ABOUTME: Application manifest types and parsing for skala.yml.
// ABOUTME: Handles YAML parsing, discovery, and type-derived defaults.

mod init;
mod server;

pub use init::init_config;
pub use server::ServerConfig;

use crate::error::{Error, Result};
use crate::types::AppName;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "skala.yml";
pub const CONFIG_FILENAME_ALT: &str = "skala.yaml";

/// Kind of application being deployed; selects the default deploy script
/// and the default shared/writable paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    Laravel,
    Nodejs,
    Static,
}

/// How a deploy changes the code on the target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Build into a fresh release directory; a symlink swap makes it live.
    /// Supports rollback.
    #[default]
    Atomic,
    /// Build directly inside the live directory. No isolation, no rollback.
    InPlace,
}

/// One application's deployment manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppName,

    /// Target host. `None` deploys onto the local machine.
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Git repository URL.
    pub repository: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    pub app_type: AppType,

    #[serde(default)]
    pub strategy: Strategy,

    /// Base path on the target host. Derived from the app name when unset.
    #[serde(default, rename = "deploy_path")]
    pub custom_deploy_path: Option<String>,

    /// How many releases to retain after a successful deploy.
    #[serde(default = "default_releases_to_keep")]
    pub releases_to_keep: NonZeroUsize,

    /// Relative paths preserved across releases. Type defaults when unset.
    #[serde(default, rename = "shared_paths")]
    pub custom_shared_paths: Option<Vec<String>>,

    /// Relative paths whose permissions are relaxed. Type defaults when unset.
    #[serde(default, rename = "writable_paths")]
    pub custom_writable_paths: Option<Vec<String>>,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub node_version: Option<String>,

    /// Wall-clock budget for a forward deploy.
    #[serde(default = "default_deploy_timeout", with = "humantime_serde")]
    pub deploy_timeout: Duration,

    /// Wall-clock budget for a rollback. Much shorter: no build runs.
    #[serde(default = "default_rollback_timeout", with = "humantime_serde")]
    pub rollback_timeout: Duration,

    /// Custom deploy script template. Type default when unset.
    #[serde(default)]
    pub script: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_releases_to_keep() -> NonZeroUsize {
    NonZeroUsize::new(5).expect("5 is non-zero")
}

fn default_deploy_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_rollback_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [dir.join(CONFIG_FILENAME), dir.join(CONFIG_FILENAME_ALT)];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// The base deploy path, derived lazily from the app name when not
    /// configured.
    pub fn deploy_path(&self) -> String {
        self.custom_deploy_path
            .clone()
            .unwrap_or_else(|| format!("/var/www/{}", self.app))
    }

    /// The shared paths to preserve across releases.
    pub fn shared_paths(&self) -> Vec<String> {
        match &self.custom_shared_paths {
            Some(paths) => paths.clone(),
            None => match self.app_type {
                AppType::Laravel => vec![".env".to_string(), "storage".to_string()],
                AppType::Nodejs => vec![".env".to_string()],
                AppType::Static => Vec::new(),
            },
        }
    }

    /// The paths needing relaxed permissions.
    pub fn writable_paths(&self) -> Vec<String> {
        match &self.custom_writable_paths {
            Some(paths) => paths.clone(),
            None => match self.app_type {
                AppType::Laravel => {
                    vec!["storage".to_string(), "bootstrap/cache".to_string()]
                }
                AppType::Nodejs | AppType::Static => Vec::new(),
            },
        }
    }

    /// A minimal valid config, used by `skala init` and tests.
    pub fn template() -> Self {
        Self {
            app: AppName::new("myapp").expect("template name is valid"),
            server: None,
            repository: "https://github.com/acme/myapp.git".to_string(),
            branch: default_branch(),
            app_type: AppType::Static,
            strategy: Strategy::Atomic,
            custom_deploy_path: None,
            releases_to_keep: default_releases_to_keep(),
            custom_shared_paths: None,
            custom_writable_paths: None,
            domain: None,
            node_version: None,
            deploy_timeout: default_deploy_timeout(),
            rollback_timeout: default_rollback_timeout(),
            script: None,
        }
    }
}
