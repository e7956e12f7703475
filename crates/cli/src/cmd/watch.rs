//! Implementation of the `tether watch` command.

use std::path::Path;

use anyhow::{Context, Result};

use tether_lib::config::Settings;
use tether_lib::exec::SystemRunner;
use tether_lib::metadata::Imds;
use tether_lib::watch::TerminationWatch;

/// Poll for spot termination until the process is killed.
pub fn cmd_watch(config: Option<&Path>) -> Result<()> {
  let settings = Settings::resolve(config)?;
  let metadata = Imds::new(settings.metadata_endpoint.clone(), settings.token_ttl)
    .context("Failed to build metadata client")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let watcher = TerminationWatch::new(metadata, SystemRunner, settings.watch_interval);
  rt.block_on(watcher.run());

  Ok(())
}
