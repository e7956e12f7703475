//! Host preparation steps around reconciliation.
//!
//! These are plain sequential commands: package installation, bind mounts
//! and service setup from files kept on the persistent volume.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::exec::{CommandRunner, CommandSpec, ExecError};

/// Errors that can occur while preparing the host.
#[derive(Debug, Error)]
pub enum SystemError {
  #[error(transparent)]
  Command(#[from] ExecError),

  #[error("failed to {action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Packages installed on every boot.
pub fn default_packages() -> Vec<String> {
  [
    "zfsutils-linux",
    "docker.io",
    "docker-compose-v2",
    "caddy",
    "awscli",
    "zsh",
    "rclone",
  ]
  .into_iter()
  .map(str::to_string)
  .collect()
}

/// Refresh package indexes and install `packages`.
pub async fn install_packages<R: CommandRunner>(runner: &R, packages: &[String]) -> Result<(), SystemError> {
  if packages.is_empty() {
    return Ok(());
  }
  runner.run(&CommandSpec::new("apt-get").arg("update")).await?;
  runner
    .run(
      &CommandSpec::new("apt-get")
        .args(["install", "-y"])
        .args(packages.iter().cloned()),
    )
    .await?;
  info!(count = packages.len(), "system packages installed");
  Ok(())
}

/// A directory exposed at a second location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BindMount {
  pub source: PathBuf,
  pub target: PathBuf,
}

/// Bind-mount every entry whose target is not already a mount point.
pub async fn ensure_bind_mounts<R: CommandRunner>(runner: &R, mounts: &[BindMount]) -> Result<(), SystemError> {
  for mount in mounts {
    let target = mount.target.display().to_string();
    let probe = CommandSpec::new("mountpoint").args(["-q", target.as_str()]);
    if runner.run(&probe).await.is_ok() {
      info!(target = %target, "bind mount already present");
      continue;
    }

    fs::create_dir_all(&mount.target).map_err(|source| SystemError::Io {
      action: "create",
      path: mount.target.clone(),
      source,
    })?;
    let source = mount.source.display().to_string();
    runner
      .run(&CommandSpec::new("mount").args(["--bind", source.as_str(), target.as_str()]))
      .await?;
    info!(source = %source, target = %target, "bind mount created");
  }
  Ok(())
}

/// Service setup driven by files on the persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
  pub enabled: bool,
  /// System Caddyfile, rewritten to import the one on the volume.
  pub caddyfile: PathBuf,
  pub systemd_dir: PathBuf,
  /// Template unit file name, read from the volume root.
  pub unit_name: String,
  /// Instances of the template unit to enable.
  pub sites: Vec<String>,
}

impl Default for StartupConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      caddyfile: PathBuf::from("/etc/caddy/Caddyfile"),
      systemd_dir: PathBuf::from("/etc/systemd/system"),
      unit_name: "rontor-site@.service".to_string(),
      sites: Vec::new(),
    }
  }
}

impl StartupConfig {
  fn unit_instance(&self, site: &str) -> String {
    match self.unit_name.split_once("@.") {
      Some((prefix, suffix)) => format!("{}@{}.{}", prefix, site, suffix),
      None => self.unit_name.clone(),
    }
  }
}

fn systemctl<const N: usize>(args: [&str; N]) -> CommandSpec {
  CommandSpec::new("systemctl").args(args)
}

/// Point the web server and site units at the persistent volume.
///
/// Returns the sites that failed to start. A failing site does not stop the
/// remaining ones; every other failure aborts.
pub async fn run_startup<R: CommandRunner>(
  runner: &R,
  config: &StartupConfig,
  mount_point: &Path,
) -> Result<Vec<String>, SystemError> {
  let import = format!("import {}\n", mount_point.join("Caddyfile").display());
  if let Some(parent) = config.caddyfile.parent() {
    fs::create_dir_all(parent).map_err(|source| SystemError::Io {
      action: "create",
      path: parent.to_path_buf(),
      source,
    })?;
  }
  fs::write(&config.caddyfile, import).map_err(|source| SystemError::Io {
    action: "write",
    path: config.caddyfile.clone(),
    source,
  })?;
  info!(path = %config.caddyfile.display(), "caddyfile updated");

  runner.run(&systemctl(["enable", "caddy"])).await?;
  runner.run(&systemctl(["restart", "caddy"])).await?;

  let unit_source = mount_point.join(&config.unit_name);
  let unit_target = config.systemd_dir.join(&config.unit_name);
  fs::copy(&unit_source, &unit_target).map_err(|source| SystemError::Io {
    action: "copy",
    path: unit_source.clone(),
    source,
  })?;
  runner.run(&systemctl(["daemon-reload"])).await?;
  info!(unit = %unit_target.display(), "service unit installed");

  let mut failed = Vec::new();
  for site in &config.sites {
    let unit = config.unit_instance(site);
    let result = async {
      runner.run(&systemctl(["enable", unit.as_str()])).await?;
      runner.run(&systemctl(["reload-or-restart", unit.as_str()])).await
    }
    .await;
    match result {
      Ok(_) => info!(site = %site, "site service enabled and started"),
      Err(err) => {
        error!(site = %site, error = %err, "failed to enable and start site service");
        failed.push(site.clone());
      }
    }
  }

  Ok(failed)
}
