use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use survey_core::{StoreOptions, SurveyError};
use thiserror::Error;

pub const ENV_TREE_SURVEY_CONFIG: &str = "TREE_SURVEY_CONFIG";

const DEFAULT_STORE_FILE_NAME: &str = "tree-survey.db";
const LOG_FILE_NAME: &str = "tree-survey.log";
const DEFAULT_SERVER_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_SERVER_REQUEST_TIMEOUT_SECS: u64 = 20;
const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DATABASE_BUSY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_DATABASE_WAL_ENABLED: bool = true;
const DEFAULT_SYNC_REQUEST_TIMEOUT_SECS: u64 = 20;
const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<ConfigError> for SurveyError {
    fn from(err: ConfigError) -> Self {
        SurveyError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurveyConfig {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub server: ServerConfigToml,
    #[serde(default)]
    pub database: DatabaseConfigToml,
    #[serde(default)]
    pub sync: SyncConfigToml,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            server: ServerConfigToml::default(),
            database: DatabaseConfigToml::default(),
            sync: SyncConfigToml::default(),
        }
    }
}

impl SurveyConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout_ms: self.database.busy_timeout_ms,
            wal_enabled: self.database.wal_enabled,
        }
    }

    pub fn server_request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.server.reachability_timeout_secs)
    }

    pub fn sync_request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    /// Log file sitting next to the store file.
    pub fn log_path(&self) -> PathBuf {
        Path::new(&self.store_path)
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| parent.join(LOG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfigToml {
    #[serde(default = "default_server_base_url")]
    pub base_url: String,
    #[serde(default = "default_server_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reachability_timeout_secs")]
    pub reachability_timeout_secs: u64,
}

impl Default for ServerConfigToml {
    fn default() -> Self {
        Self {
            base_url: default_server_base_url(),
            request_timeout_secs: default_server_request_timeout_secs(),
            reachability_timeout_secs: default_reachability_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfigToml {
    #[serde(default = "default_database_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_database_wal_enabled")]
    pub wal_enabled: bool,
}

impl Default for DatabaseConfigToml {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_database_busy_timeout_ms(),
            wal_enabled: default_database_wal_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfigToml {
    /// Bound on each create/update call made by a sync run.
    #[serde(default = "default_sync_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfigToml {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_sync_request_timeout_secs(),
        }
    }
}

pub fn load_from_env() -> Result<SurveyConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<SurveyConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("tree-survey").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_TREE_SURVEY_CONFIG) {
        Ok(raw) if raw.trim().is_empty() => default_config_path(),
        Ok(raw) => Ok(PathBuf::from(raw.trim())),
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "TREE_SURVEY_CONFIG contained invalid UTF-8",
        )),
    }
}

fn resolve_data_dir() -> PathBuf {
    if let Some(path) = non_empty_env("XDG_DATA_HOME") {
        return absolutize_path(PathBuf::from(path));
    }
    if let Some(home) = resolve_home_dir() {
        return home.join(".local").join("share");
    }
    std::env::temp_dir()
}

fn resolve_home_dir() -> Option<PathBuf> {
    non_empty_env("HOME")
        .or_else(|| non_empty_env("USERPROFILE"))
        .map(PathBuf::from)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn absolutize_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(current) => current.join(path),
        Err(_) => std::env::temp_dir().join(path),
    }
}

fn default_store_path() -> String {
    resolve_data_dir()
        .join("tree-survey")
        .join(DEFAULT_STORE_FILE_NAME)
        .to_string_lossy()
        .to_string()
}

fn default_server_base_url() -> String {
    DEFAULT_SERVER_BASE_URL.to_owned()
}

fn default_server_request_timeout_secs() -> u64 {
    DEFAULT_SERVER_REQUEST_TIMEOUT_SECS
}

fn default_reachability_timeout_secs() -> u64 {
    DEFAULT_REACHABILITY_TIMEOUT_SECS
}

fn default_database_busy_timeout_ms() -> u64 {
    DEFAULT_DATABASE_BUSY_TIMEOUT_MS
}

fn default_database_wal_enabled() -> bool {
    DEFAULT_DATABASE_WAL_ENABLED
}

fn default_sync_request_timeout_secs() -> u64 {
    DEFAULT_SYNC_REQUEST_TIMEOUT_SECS
}

fn persist_config(path: &Path, config: &SurveyConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize tree-survey config for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write tree-survey config to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<SurveyConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create config directory {}: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let mut config = SurveyConfig::default();
            normalize_config(&mut config);
            persist_config(path, &config)?;
            return Ok(config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read tree-survey config from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: SurveyConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse tree-survey config from {}: {err}",
            path.display()
        ))
    })?;

    if normalize_config(&mut config) {
        persist_config(path, &config)?;
    }

    Ok(config)
}

/// Fills blanks with defaults and clamps numeric settings; returns whether anything changed.
fn normalize_config(config: &mut SurveyConfig) -> bool {
    let mut changed = false;

    if config.store_path.trim().is_empty() {
        config.store_path = default_store_path();
        changed = true;
    }
    changed |= normalize_server_config(&mut config.server);
    changed |= normalize_database_config(&mut config.database);
    changed |= normalize_timeout_secs(
        &mut config.sync.request_timeout_secs,
        DEFAULT_SYNC_REQUEST_TIMEOUT_SECS,
    );

    changed
}

pub fn normalize_server_config(config: &mut ServerConfigToml) -> bool {
    let mut changed = false;

    let base_url = config.base_url.trim().trim_end_matches('/');
    let base_url = if base_url.is_empty() {
        default_server_base_url()
    } else {
        base_url.to_owned()
    };
    if base_url != config.base_url {
        config.base_url = base_url;
        changed = true;
    }

    changed |= normalize_timeout_secs(
        &mut config.request_timeout_secs,
        DEFAULT_SERVER_REQUEST_TIMEOUT_SECS,
    );
    changed |= normalize_timeout_secs(
        &mut config.reachability_timeout_secs,
        DEFAULT_REACHABILITY_TIMEOUT_SECS,
    );
    changed
}

pub fn normalize_database_config(config: &mut DatabaseConfigToml) -> bool {
    let normalized_busy_timeout_ms = if config.busy_timeout_ms == 0 {
        default_database_busy_timeout_ms()
    } else {
        config.busy_timeout_ms.clamp(100, 60_000)
    };
    if normalized_busy_timeout_ms != config.busy_timeout_ms {
        config.busy_timeout_ms = normalized_busy_timeout_ms;
        return true;
    }
    false
}

fn normalize_timeout_secs(value: &mut u64, default: u64) -> bool {
    let normalized = if *value == 0 {
        default
    } else {
        (*value).min(MAX_TIMEOUT_SECS)
    };
    if normalized != *value {
        *value = normalized;
        return true;
    }
    false
}
