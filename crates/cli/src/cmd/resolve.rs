//! Implementation of the `tether resolve` command.

use std::path::Path;

use anyhow::{Context, Result};

use tether_lib::config::Settings;
use tether_lib::exec::SystemRunner;
use tether_lib::identity::{DesiredState, fetch_identity};
use tether_lib::metadata::Imds;
use tether_lib::resources::{AwsCli, TagStore};
use tether_lib::retry::retry;

use crate::output::{OutputFormat, print_json, print_stat, print_success};

/// Resolve and print the desired state without changing anything.
pub fn cmd_resolve(config: Option<&Path>, format: OutputFormat) -> Result<()> {
  let settings = Settings::resolve(config)?;
  let metadata = Imds::new(settings.metadata_endpoint.clone(), settings.token_ttl)
    .context("Failed to build metadata client")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let desired = rt.block_on(async {
    let identity = fetch_identity(&metadata, &settings.retry).await?;
    let cloud = AwsCli::new(SystemRunner, settings.aws_cli.clone(), identity.region.clone());
    let tags = retry(&settings.retry, "fetch instance tags", || cloud.instance_tags(&identity.instance_id)).await?;
    anyhow::Ok(DesiredState::from_tags(&identity, &tags)?)
  })?;

  if format.is_json() {
    return print_json(&desired);
  }

  print_success(&format!("Desired state for {}", desired.instance_id));
  print_stat("Region", &desired.region);
  print_stat("Elastic IP", desired.elastic_ip.as_deref().unwrap_or("(none)"));
  print_stat("Volume", &desired.volume_id);
  print_stat("IPv6", desired.ipv6.as_deref().unwrap_or("(none)"));
  print_stat("Mount point", &desired.mount_point.display().to_string());

  Ok(())
}
