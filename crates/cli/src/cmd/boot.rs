//! Implementation of the `tether boot` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::warn;

use tether_lib::boot::{BootReport, boot};
use tether_lib::config::Settings;
use tether_lib::exec::SystemRunner;
use tether_lib::logging::LogService;
use tether_lib::metadata::Imds;
use tether_lib::reconcile::{AddressOutcome, Ipv6Outcome, VolumeOutcome};
use tether_lib::resources::AwsCli;
use tether_lib::watch::TerminationWatch;

use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning,
};

/// Execute the boot command.
///
/// Provisions the instance and, unless `watch` is false, then polls for
/// spot termination until the process is killed. A step failure after
/// tags were read is reported but does not stop the watch.
pub fn cmd_boot(config: Option<&Path>, log: &LogService, watch: bool, format: OutputFormat) -> Result<()> {
  let settings = Settings::resolve(config)?;
  let metadata = Imds::new(settings.metadata_endpoint.clone(), settings.token_ttl)
    .context("Failed to build metadata client")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let start = Instant::now();
  let report = rt.block_on(boot(&settings, &metadata, &SystemRunner, log, |identity| {
    AwsCli::new(SystemRunner, settings.aws_cli.clone(), identity.region.clone())
  }))?;
  let elapsed = start.elapsed();

  if format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, elapsed);
  }

  if watch {
    if !report.is_complete() {
      warn!("provisioning incomplete, watching for termination anyway");
    }
    let watcher = TerminationWatch::new(metadata, SystemRunner, settings.watch_interval);
    rt.block_on(watcher.run());
  }

  Ok(())
}

fn print_report(report: &BootReport, elapsed: std::time::Duration) {
  match &report.aborted {
    None => print_success(&format!("Provisioned {}", report.desired.instance_id)),
    Some((step, err)) => print_error(&format!("Provisioning stopped at {:?}: {}", step, err)),
  }

  print_stat("Region", &report.desired.region);

  if let Some(outcome) = &report.address {
    let ip = report.desired.elastic_ip.as_deref().unwrap_or("-");
    let detail = match outcome {
      AddressOutcome::AlreadyAssociated => "already associated".to_string(),
      AddressOutcome::Associated { previous_owner: Some(owner) } => format!("taken from {}", owner),
      AddressOutcome::Associated { previous_owner: None } => "associated".to_string(),
    };
    print_stat("Elastic IP", &format!("{} ({})", ip, detail));
  }

  if let Some(outcome) = &report.volume {
    let detail = match outcome {
      VolumeOutcome::AlreadyAttached => "already attached".to_string(),
      VolumeOutcome::Attached { waited } if waited.is_zero() => "attached".to_string(),
      VolumeOutcome::Attached { waited } => format!("attached after {}", format_duration(*waited)),
    };
    print_stat("Volume", &format!("{} ({})", report.desired.volume_id, detail));
  }

  if let Some(outcome) = &report.ipv6 {
    let ip = report.desired.ipv6.as_deref().unwrap_or("-");
    let detail = match outcome {
      Ipv6Outcome::AlreadyAssigned { interface_id } => format!("already on {}", interface_id),
      Ipv6Outcome::Assigned { interface_id } => format!("assigned to {}", interface_id),
    };
    print_stat("IPv6", &format!("{} ({})", ip, detail));
  }

  if let Some(pool) = &report.pool {
    print_stat(
      "Pool",
      &format!("{} mounted, {} unmounted", pool.mounted.len(), pool.unmounted.len()),
    );
    for dataset in &pool.unmounted {
      print_warning(&format!("Dataset {} is not mounted", dataset));
    }
  }

  if let Some(path) = &report.log_path {
    print_stat("Log", &path.display().to_string());
  }

  for site in &report.failed_sites {
    print_warning(&format!("Site {} failed to start", site));
  }

  print_info(&format!("Finished in {}", format_duration(elapsed)));
}
