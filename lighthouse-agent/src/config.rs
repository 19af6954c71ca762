//! Configuration management
//!
//! Handles:
//! - Data directory resolution (system dir, user config dir, or cwd fallback)
//! - Instance descriptors persisted in `config.toml`
//! - Auto-update preference

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.json";
pub const LOG_FILE_NAME: &str = "harbor-lighthouse.log";

/// Env var overriding the data directory
pub const HOME_ENV: &str = "LIGHTHOUSE_HOME";

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write config at {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("instance '{0}' already exists")]
    DuplicateInstance(String),
}

/// One configured collection-and-delivery unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub harbor_id: String,
    #[serde(default)]
    pub api_key: String,
    pub source: String,
    pub harbor_type: String,
    /// Seconds between cycles; values below 1 mean "use the default"
    #[serde(default)]
    pub interval: i64,
    /// Samples per cargo batch; values below 1 mean "use the default"
    #[serde(default)]
    pub max_batch_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Opaque collector parameters (kept last: it serializes as a TOML table)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Instance {
    pub fn effective_interval(&self) -> Duration {
        if self.interval < 1 {
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.interval as u64)
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        if self.max_batch_size < 1 {
            DEFAULT_MAX_BATCH_SIZE
        } else {
            self.max_batch_size as usize
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

fn default_auto_update() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_update: true,
            instances: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load config from `path`; a missing file is an empty config
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path: path.to_path_buf(), source }),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(path, content).await.map_err(write_err)
    }

    pub fn add(&mut self, instance: Instance) -> Result<(), ConfigError> {
        if self.instances.iter().any(|i| i.name == instance.name) {
            return Err(ConfigError::DuplicateInstance(instance.name));
        }
        self.instances.push(instance);
        Ok(())
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        self.auto_update = enabled;
    }

    /// Remove an instance by name, returns whether one was removed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i.name != name);
        self.instances.len() != before
    }
}

/// Resolved on-disk locations
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// Pick the data directory: env override, system dir, user config dir, then cwd
    pub fn resolve() -> Self {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
            return Self::new(dir);
        }

        let candidates = [
            Some(Self::system_dir()),
            dirs::config_dir().map(|d| d.join("harbor-lighthouse")),
        ];
        for dir in candidates.into_iter().flatten() {
            if std::fs::create_dir_all(&dir).is_ok() && is_writable(&dir) {
                return Self::new(dir);
            }
        }

        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    fn system_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            let base = std::env::var_os("ProgramData").unwrap_or_else(|| "C:\\ProgramData".into());
            PathBuf::from(base).join("HarborLighthouse")
        } else {
            PathBuf::from("/etc/harbor-lighthouse")
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(".lighthouse-write-test");
    let ok = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
