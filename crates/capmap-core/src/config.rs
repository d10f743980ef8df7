use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::MAX_HIERARCHY_DEPTH;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    /// Postgres URL. Falls back to `DATABASE_URL`; never serialized or logged.
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub url: Option<SecretString>,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "DatabaseConfig::default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Applied per unit of work; 0 disables.
    #[serde(default)]
    pub statement_timeout_ms: u64,
    /// Session variable the row-level-security policies compare against.
    #[serde(default = "DatabaseConfig::default_tenant_setting")]
    pub tenant_setting: String,
    #[serde(default)]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        10
    }

    fn default_acquire_timeout_ms() -> u64 {
        5_000
    }

    pub fn default_tenant_setting() -> String {
        "app.current_tenant".to_string()
    }

    /// Resolve the connection URL from config, then `DATABASE_URL`.
    pub fn resolve_url(&self) -> Option<SecretString> {
        self.url
            .clone()
            .filter(|url| !url.expose_secret().trim().is_empty())
            .or_else(|| {
                env::var("DATABASE_URL")
                    .ok()
                    .filter(|value| !value.trim().is_empty())
                    .map(SecretString::from)
            })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: Self::default_max_connections(),
            min_connections: 0,
            acquire_timeout_ms: Self::default_acquire_timeout_ms(),
            statement_timeout_ms: 0,
            tenant_setting: Self::default_tenant_setting(),
            run_migrations: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectionConfig {
    /// Cap on ancestor/descendant walks. May be lowered, never raised past 10.
    #[serde(default = "ProjectionConfig::default_max_depth")]
    pub max_hierarchy_depth: usize,
}

impl ProjectionConfig {
    fn default_max_depth() -> usize {
        MAX_HIERARCHY_DEPTH
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: Self::default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be > 0"
        );
        anyhow::ensure!(
            self.database.min_connections <= self.database.max_connections,
            "database.min_connections cannot exceed database.max_connections"
        );
        anyhow::ensure!(
            is_setting_name(&self.database.tenant_setting),
            "database.tenant_setting must look like `prefix.name` (letters, digits, underscores)"
        );
        anyhow::ensure!(
            (1..=MAX_HIERARCHY_DEPTH).contains(&self.projection.max_hierarchy_depth),
            "projection.max_hierarchy_depth must be 1..={}",
            MAX_HIERARCHY_DEPTH
        );
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level cannot be empty"
        );
        Ok(())
    }
}

/// Postgres custom settings are `prefix.name`; the value is spliced into SQL.
pub fn is_setting_name(name: &str) -> bool {
    let mut parts = name.split('.');
    let (Some(prefix), Some(key), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    [prefix, key].iter().all(|part| {
        !part.is_empty()
            && part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

pub struct ConfigManager;

impl ConfigManager {
    /// Priority order:
    /// 1. ~/.capmap/
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let capmap_dir = home_dir.join(".capmap");
            if capmap_dir.exists() {
                info!("Using config directory: {:?}", capmap_dir);
                return capmap_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Settings> {
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yaml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.json")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.yaml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.json", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("CAPMAP").separator("__"));

        let settings: Settings = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.database.tenant_setting, "app.current_tenant");
        assert_eq!(settings.projection.max_hierarchy_depth, 10);
    }

    #[test]
    fn depth_cannot_exceed_fixed_cap() {
        let mut settings = Settings::default();
        settings.projection.max_hierarchy_depth = 11;
        assert!(settings.validate().is_err());
        settings.projection.max_hierarchy_depth = 0;
        assert!(settings.validate().is_err());
        settings.projection.max_hierarchy_depth = 4;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn setting_name_rejects_injection() {
        assert!(is_setting_name("app.current_tenant"));
        assert!(is_setting_name("_x.y1"));
        assert!(!is_setting_name("current_tenant"));
        assert!(!is_setting_name("app.tenant'); DROP TABLE x; --"));
        assert!(!is_setting_name("a.b.c"));
        assert!(!is_setting_name("1a.b"));
    }

    #[test]
    fn url_is_not_serialized() {
        let mut settings = Settings::default();
        settings.database.url = Some(SecretString::from("postgres://u:p@h/db".to_string()));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("postgres://"));
    }
}
