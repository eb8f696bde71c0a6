// ABOUTME: Config scaffolding for new applications.
// ABOUTME: Creates skala.yml template files.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::AppName;

use super::{AppConfig, CONFIG_FILENAME};

pub fn init_config(
    dir: &Path,
    app: Option<&str>,
    repository: Option<&str>,
    force: bool,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = AppConfig::template();

    if let Some(name) = app {
        config.app = AppName::new(name).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    if let Some(repo) = repository {
        config.repository = repo.to_string();
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &AppConfig) -> String {
    format!(
        r#"app: {}
repository: {}
branch: main
# laravel, nodejs, or static
app_type: static
# atomic keeps numbered releases and supports rollback; in_place does not
strategy: atomic
releases_to_keep: 5
# server:
#   host: app-1.example.com
#   user: deploy
# deploy_path: /var/www/{}
# shared_paths: [".env", "storage"]
# writable_paths: ["storage"]
# deploy_timeout: 30m
# rollback_timeout: 2m
"#,
        config.app, config.repository, config.app
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_parseable_config() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("shop"), None, false).unwrap();

        let config = AppConfig::discover(dir.path()).unwrap();
        assert_eq!(config.app.as_str(), "shop");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, None, false).unwrap();

        let result = init_config(dir.path(), None, None, false);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        assert!(init_config(dir.path(), None, None, true).is_ok());
    }
}
