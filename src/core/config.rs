//! Runtime configuration.
//!
//! Loaded from `hivemined.toml` in the state directory (or an explicit `--config` path).
//! A missing file is not an error: every section has defaults that match a stock install.
//! A handful of environment variables override the file for containerized deployments.

use crate::core::entity::{ResourceLimits, RestartMode, RestartPolicy};
use crate::core::error::HiveError;
use crate::core::image::ImageRef;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "hivemined.toml";
pub const DEFAULT_STATE_DIR: &str = "/var/hivemined";

pub const ENV_STATE_DIR: &str = "HIVEMINED_STATE_DIR";
pub const ENV_ENGINE_HOST: &str = "HIVEMINED_ENGINE_HOST";
pub const ENV_ENGINE_BINARY: &str = "HIVEMINED_ENGINE_BINARY";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub labels: LabelConfig,
    pub images: ImagesConfig,
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI to spawn. Autodetected (`docker`, then `podman`) when unset.
    pub binary: Option<String>,
    /// Engine endpoint passed as `-H`, e.g. `unix:///var/run/docker.sock`.
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `hive.db`; the state directory when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelConfig {
    pub prefix: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: "hivemined".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImageConfig {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub build_path: Option<PathBuf>,
}

impl ImageConfig {
    fn new(name: &str, build_path: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            tag: None,
            build_path: build_path.map(PathBuf::from),
        }
    }

    pub fn to_image_ref(&self) -> ImageRef {
        let mut image = ImageRef::new(self.name.clone());
        if let Some(tag) = &self.tag {
            image = image.with_tag(tag.clone());
        }
        if let Some(path) = &self.build_path {
            image = image.with_build_path(path.clone());
        }
        image
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub worker: ImageConfig,
    pub drone: ImageConfig,
    pub coordinator: ImageConfig,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            worker: ImageConfig::new("hivemined/worker", Some("/usr/local/src/worker/")),
            drone: ImageConfig::new("hivemined/drone", Some("/usr/local/src/drone/")),
            coordinator: ImageConfig::new("hivemined/queen", None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "queen".to_string(),
        }
    }
}

/// Defaults applied to new workers unless overridden on the command line.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub memory: Option<String>,
    pub swap: Option<String>,
    pub cpu_shares: Option<u32>,
    pub restart: RestartMode,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            memory: None,
            swap: None,
            cpu_shares: None,
            restart: RestartMode::Always,
            max_retries: 0,
        }
    }
}

impl WorkerConfig {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory: self.memory.clone(),
            swap: self.swap.clone(),
            cpu_shares: self.cpu_shares,
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(self.restart, self.max_retries)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, HiveError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| HiveError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolves the state directory and the config file inside it, then applies
    /// environment overrides.
    pub fn discover(
        explicit_path: Option<&Path>,
        state_dir: Option<&Path>,
    ) -> Result<(Self, PathBuf), HiveError> {
        let state_dir = state_dir
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_STATE_DIR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| state_dir.join(CONFIG_FILE_NAME));
        let mut config = Config::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, state_dir))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_ENGINE_HOST).filter(|v| !v.is_empty()) {
            self.engine.host = Some(host);
        }
        if let Some(binary) = lookup(ENV_ENGINE_BINARY).filter(|v| !v.is_empty()) {
            self.engine.binary = Some(binary);
        }
    }

    pub fn validate(&self) -> Result<(), HiveError> {
        if self.labels.prefix.trim().is_empty() {
            return Err(HiveError::Config("labels.prefix must not be empty".to_string()));
        }
        crate::core::entity::validate_name(&self.coordinator.name)
            .map_err(|e| HiveError::Config(format!("coordinator.name: {}", e)))?;
        for (section, image) in [
            ("images.worker", &self.images.worker),
            ("images.drone", &self.images.drone),
            ("images.coordinator", &self.images.coordinator),
        ] {
            if image.name.trim().is_empty() {
                return Err(HiveError::Config(format!("{}.name must not be empty", section)));
            }
        }
        Ok(())
    }

    pub fn store_dir(&self, state_dir: &Path) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| state_dir.to_path_buf())
    }
}
