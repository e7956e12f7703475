//! Implementation of the `tether site` command.

use std::path::Path;

use anyhow::{Context, Result};

use tether_lib::exec::SystemRunner;
use tether_lib::site::{SiteOp, control_site};

use crate::output::print_success;

pub fn cmd_site(root: &Path, site: &str, op: SiteOp) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(control_site(&SystemRunner, root, site, op))
    .with_context(|| format!("Failed to {} site '{}'", op, site))?;

  print_success(&format!("Site {}: {}", site, op));
  Ok(())
}
