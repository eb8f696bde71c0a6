// ABOUTME: Deploy script templates and placeholder substitution.
// ABOUTME: Substitution is literal single-pass string replacement, not templating.

use super::error::{DeployError, TemplateSnafu};
use crate::config::{AppConfig, AppType, Strategy};
use snafu::ensure;

/// Placeholder tokens recognized in deploy script templates.
pub const PLACEHOLDERS: [&str; 5] = [
    "$DEPLOY_PATH",
    "$BRANCH",
    "$APP_NAME",
    "$DOMAIN",
    "$NODE_VERSION",
];

/// Values substituted into a script template.
///
/// Substitution is literal and single-pass: a value must not itself contain a
/// placeholder token, and [`render`] rejects one that does rather than
/// producing surprising double substitution.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub deploy_path: String,
    pub branch: String,
    pub app_name: String,
    pub domain: String,
    pub node_version: String,
}

impl ScriptContext {
    pub fn for_config(config: &AppConfig) -> Self {
        Self {
            deploy_path: config.deploy_path(),
            branch: config.branch.clone(),
            app_name: config.app.to_string(),
            domain: config.domain.clone().unwrap_or_default(),
            node_version: config.node_version.clone().unwrap_or_default(),
        }
    }
}

/// The default script template for an application type and strategy.
///
/// In-place scripts update the working tree themselves; atomic scripts run
/// inside a freshly cloned release directory, so they only build.
pub fn default_template(app_type: AppType, strategy: Strategy) -> &'static str {
    match (strategy, app_type) {
        (Strategy::Atomic, AppType::Laravel) => {
            "composer install --no-dev --prefer-dist --no-interaction\n\
             php artisan config:cache\n\
             php artisan migrate --force\n"
        }
        (Strategy::Atomic, AppType::Nodejs) => {
            "echo \"building $APP_NAME with node $NODE_VERSION\"\n\
             npm ci --no-audit\n\
             npm run build --if-present\n"
        }
        (Strategy::Atomic, AppType::Static) => {
            "echo \"static site $APP_NAME: nothing to build\"\n"
        }
        (Strategy::InPlace, AppType::Laravel) => {
            "git fetch origin $BRANCH\n\
             git reset --hard origin/$BRANCH\n\
             composer install --no-dev --prefer-dist --no-interaction\n\
             php artisan config:cache\n\
             php artisan migrate --force\n"
        }
        (Strategy::InPlace, AppType::Nodejs) => {
            "git fetch origin $BRANCH\n\
             git reset --hard origin/$BRANCH\n\
             echo \"building $APP_NAME with node $NODE_VERSION\"\n\
             npm ci --no-audit\n\
             npm run build --if-present\n"
        }
        (Strategy::InPlace, AppType::Static) => {
            "git fetch origin $BRANCH\n\
             git reset --hard origin/$BRANCH\n"
        }
    }
}

/// The script to run for a config: the custom template when set, the
/// type default otherwise.
pub fn script_template(config: &AppConfig) -> &str {
    config
        .script
        .as_deref()
        .unwrap_or_else(|| default_template(config.app_type, config.strategy))
}

/// Substitute placeholders into a template.
///
/// Each token is replaced exactly once, in one pass. Substitution values
/// containing a placeholder token are a configuration error.
pub fn render(template: &str, ctx: &ScriptContext) -> Result<String, DeployError> {
    let substitutions = [
        ("$DEPLOY_PATH", ctx.deploy_path.as_str()),
        ("$BRANCH", ctx.branch.as_str()),
        ("$APP_NAME", ctx.app_name.as_str()),
        ("$DOMAIN", ctx.domain.as_str()),
        ("$NODE_VERSION", ctx.node_version.as_str()),
    ];

    for (token, value) in &substitutions {
        ensure!(
            !PLACEHOLDERS.iter().any(|p| value.contains(p)),
            TemplateSnafu {
                message: format!("substitution value for {token} contains a placeholder token"),
            }
        );
    }

    let mut rendered = template.to_string();
    for (token, value) in &substitutions {
        rendered = rendered.replace(token, value);
    }
    Ok(rendered)
}
