//! Agent settings.
//!
//! Settings describe how the agent operates (endpoints, timings, local
//! layout). What the instance should hold comes from its tags instead; see
//! [`crate::identity`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::metadata::{DEFAULT_ENDPOINT, DEFAULT_TOKEN_TTL};
use crate::pool::PoolConfig;
use crate::reconcile::VolumeWait;
use crate::retry::{RetryPolicy, secs};
use crate::system::{BindMount, StartupConfig, default_packages};
use crate::watch::DEFAULT_POLL_INTERVAL;

/// Settings file consulted when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tether/tether.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings in {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub metadata_endpoint: String,
  #[serde(rename = "token_ttl_secs", with = "secs")]
  pub token_ttl: Duration,
  /// Program used for resource-control calls.
  pub aws_cli: String,
  pub retry: RetryPolicy,
  pub volume: VolumeSettings,
  pub pool: PoolConfig,
  /// Where the log lives until the persistent volume is mounted.
  pub temp_log_base: PathBuf,
  pub packages: Vec<String>,
  #[serde(rename = "watch_interval_secs", with = "secs")]
  pub watch_interval: Duration,
  pub bind_mounts: Vec<BindMount>,
  pub startup: StartupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
  /// Device name the volume is attached at.
  pub device: String,
  #[serde(flatten)]
  pub wait: VolumeWait,
}

impl Default for VolumeSettings {
  fn default() -> Self {
    Self {
      device: "/dev/sdf".to_string(),
      wait: VolumeWait::default(),
    }
  }
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      metadata_endpoint: DEFAULT_ENDPOINT.to_string(),
      token_ttl: DEFAULT_TOKEN_TTL,
      aws_cli: "aws".to_string(),
      retry: RetryPolicy::default(),
      volume: VolumeSettings::default(),
      pool: PoolConfig::default(),
      temp_log_base: PathBuf::from("/tmp"),
      packages: default_packages(),
      watch_interval: DEFAULT_POLL_INTERVAL,
      bind_mounts: Vec::new(),
      startup: StartupConfig::default(),
    }
  }
}

impl Settings {
  pub fn from_toml(text: &str, path: &Path) -> Result<Self, SettingsError> {
    toml::from_str(text).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn load(path: &Path) -> Result<Self, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml(&text, path)
  }

  /// Load `explicit` if given, else the default file if present, else
  /// built-in defaults.
  pub fn resolve(explicit: Option<&Path>) -> Result<Self, SettingsError> {
    match explicit {
      Some(path) => Self::load(path),
      None => {
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
          Self::load(default)
        } else {
          Ok(Self::default())
        }
      }
    }
  }
}
