//! Per-site container control.
//!
//! Each site is a compose project in its own directory under the volume
//! mount point; the site service unit calls back into this on start, stop
//! and reload.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

use crate::exec::{CommandRunner, CommandSpec, ExecError};

#[derive(Debug, Error)]
pub enum SiteError {
  #[error("site directory not found: {0}")]
  NotFound(PathBuf),

  #[error("unknown operation: {0}")]
  UnknownOperation(String),

  #[error(transparent)]
  Command(#[from] ExecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteOp {
  Start,
  Stop,
  Reload,
}

impl SiteOp {
  fn compose_args(self) -> &'static [&'static str] {
    match self {
      SiteOp::Start | SiteOp::Reload => &["compose", "up", "-d"],
      SiteOp::Stop => &["compose", "stop"],
    }
  }
}

impl FromStr for SiteOp {
  type Err = SiteError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "start" => Ok(SiteOp::Start),
      "stop" => Ok(SiteOp::Stop),
      "reload" => Ok(SiteOp::Reload),
      other => Err(SiteError::UnknownOperation(other.to_string())),
    }
  }
}

impl fmt::Display for SiteOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SiteOp::Start => "start",
      SiteOp::Stop => "stop",
      SiteOp::Reload => "reload",
    })
  }
}

/// Run `op` for the compose project in `<root>/<site>`.
pub async fn control_site<R: CommandRunner>(runner: &R, root: &Path, site: &str, op: SiteOp) -> Result<(), SiteError> {
  let dir = root.join(site);
  if site.is_empty() || site.contains('/') || !dir.is_dir() {
    return Err(SiteError::NotFound(dir));
  }

  let spec = CommandSpec::new("docker").args(op.compose_args().iter().copied()).current_dir(&dir);
  runner.run(&spec).await?;
  info!(site, op = %op, dir = %dir.display(), "site operation complete");
  Ok(())
}
