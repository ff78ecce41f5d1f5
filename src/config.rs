//! Configuration for mediadrop.
//!
//! Two documents are read at startup:
//!
//! - The service configuration (paths, worker timeout, ingest cadence).
//!   Sources, highest priority first:
//!   1. Environment variables (MEDIADROP_HOME, MEDIADROP_INCOME,
//!      MEDIADROP_AUTOPROCESS_CONFIG)
//!   2. Config file (.mediadrop/config.yaml, searched from the current
//!      directory upward; paths are relative to the project root)
//!   3. Defaults (~/.mediadrop, <cwd>/../income)
//!
//! - The autoprocess configuration ([`WatchConfig`]): which user owns
//!   ingested documents and which transcription parameters to use.
//!
//! Both are resolved once in `main` and passed down by value.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::TaskSettings;
use crate::ingest::AllowList;

/// Errors reading the autoprocess configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Autoprocess settings applied to every ingested file.
///
/// An empty value (the result of a missing or broken file) is valid:
/// the worker keeps running and every registration fails at user lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Transcription model name
    pub model: String,

    /// Transcription language
    pub language: String,

    /// Username that owns ingested documents
    pub user: String,

    pub number_of_speakers: Option<u32>,
}

impl WatchConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load from a YAML file, logging and falling back to an empty
    /// configuration on any failure
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Autoprocess configuration unavailable: {}", e);
                Self::default()
            }
        }
    }

    /// Task parameters for newly created documents
    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            model: self.model.clone(),
            language: self.language.clone(),
            number_of_speakers: self.number_of_speakers,
        }
    }
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Data directory holding the database and media storage
    pub home: Option<String>,
    /// Drop-box directory
    pub income: Option<String>,
    /// Autoprocess configuration file
    pub autoprocess_config: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub poll_interval_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub allowed_types: Option<Vec<String>>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Data directory (database, media storage)
    pub home: PathBuf,
    /// Drop-box directory watched for new files
    pub income: PathBuf,
    /// Autoprocess configuration file
    pub autoprocess_config: PathBuf,
    /// Path to the service config file (if found)
    pub config_file: Option<PathBuf>,
    /// Worker keepalive timeout
    pub worker_timeout: Duration,
    /// Idle sleep between ingestion cycles
    pub poll_interval: Duration,
    /// Size sampling window of the stability check
    pub stability_window: Duration,
    pub allow_list: AllowList,
}

impl ServiceConfig {
    pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
    pub const DEFAULT_STABILITY_WINDOW_MS: u64 = 1000;

    pub fn database_path(&self) -> PathBuf {
        paths::database_path(&self.home)
    }

    pub fn media_dir(&self) -> PathBuf {
        paths::media_dir(&self.home)
    }
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".mediadrop").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Combine config file, environment and defaults into a [`ServiceConfig`]
pub fn resolve<F>(
    cwd: &Path,
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: F,
) -> ServiceConfig
where
    F: Fn(&str) -> Option<String>,
{
    let (config_file, raw) = match file {
        Some((path, raw)) => (Some(path), raw),
        None => (None, ConfigFile::default()),
    };

    // Relative paths in the file are anchored at the project root (parent of .mediadrop/)
    let base_dir = config_file
        .as_deref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .unwrap_or(cwd)
        .to_path_buf();

    let home = env("MEDIADROP_HOME")
        .map(PathBuf::from)
        .or_else(|| raw.paths.home.as_deref().map(|p| resolve_path(&base_dir, p)))
        .unwrap_or(default_home);

    let income = env("MEDIADROP_INCOME")
        .map(PathBuf::from)
        .or_else(|| raw.paths.income.as_deref().map(|p| resolve_path(&base_dir, p)))
        .unwrap_or_else(|| paths::income_dir(cwd));

    let autoprocess_config = env("MEDIADROP_AUTOPROCESS_CONFIG")
        .map(PathBuf::from)
        .or_else(|| {
            raw.paths
                .autoprocess_config
                .as_deref()
                .map(|p| resolve_path(&base_dir, p))
        })
        .unwrap_or_else(|| cwd.join("auto-process-conf.yaml"));

    let worker_timeout_secs = raw
        .worker
        .as_ref()
        .and_then(|w| w.timeout_seconds)
        .unwrap_or(ServiceConfig::DEFAULT_WORKER_TIMEOUT_SECS);

    let ingest = raw.ingest.as_ref();
    let poll_interval_ms = ingest
        .and_then(|i| i.poll_interval_ms)
        .unwrap_or(ServiceConfig::DEFAULT_POLL_INTERVAL_MS);
    let stability_window_ms = ingest
        .and_then(|i| i.stability_window_ms)
        .unwrap_or(ServiceConfig::DEFAULT_STABILITY_WINDOW_MS);
    let allow_list = ingest
        .and_then(|i| i.allowed_types.clone())
        .map(AllowList::new)
        .unwrap_or_default();

    ServiceConfig {
        home,
        income,
        autoprocess_config,
        config_file,
        worker_timeout: Duration::from_secs(worker_timeout_secs),
        poll_interval: Duration::from_millis(poll_interval_ms),
        stability_window: Duration::from_millis(stability_window_ms),
        allow_list,
    }
}

/// Load the service configuration from all sources
pub fn load_config() -> Result<ServiceConfig> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".mediadrop");

    let file = match find_config_file(&cwd) {
        Some(path) => {
            let raw = load_config_file(&path)?;
            Some((path, raw))
        }
        None => None,
    };

    Ok(resolve(&cwd, default_home, file, |key| std::env::var(key).ok()))
}
