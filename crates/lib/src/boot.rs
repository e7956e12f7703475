//! The boot-time provisioning sequence.
//!
//! Order: identity, temporary log, packages, tags, elastic address, volume,
//! IPv6 address, storage pool, bind mounts, log relocation, services.
//!
//! Identity and tag problems are fatal and returned as [`BootError`]. Any
//! later failure is logged, recorded in the [`BootReport`] and ends the
//! sequence early; the caller still goes on to watch for termination.

use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::exec::CommandRunner;
use crate::identity::{ConfigError, DesiredState, Identity, fetch_identity};
use crate::logging::{LogService, log_file_path};
use crate::metadata::MetadataSource;
use crate::pool::{PoolError, PoolReport, ZfsPool, reconcile_pool};
use crate::reconcile::{
  AddressOutcome, Ipv6Outcome, ReconcileError, VolumeOutcome, reconcile_elastic_ip, reconcile_ipv6, reconcile_volume,
};
use crate::resources::{ResourceApi, ResourceError, TagStore};
use crate::retry::retry;
use crate::system::{SystemError, ensure_bind_mounts, install_packages, run_startup};

/// Failures that leave nothing to provision.
#[derive(Debug, Error)]
pub enum BootError {
  #[error("cannot resolve desired state: {0}")]
  Config(#[from] ConfigError),

  #[error("cannot read instance tags: {0}")]
  Tags(#[from] ResourceError),
}

/// A provisioning step after desired-state resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
  ElasticIp,
  Volume,
  Ipv6,
  Pool,
  BindMounts,
  Startup,
}

#[derive(Debug, Error)]
enum StepError {
  #[error(transparent)]
  Reconcile(#[from] ReconcileError),

  #[error(transparent)]
  Pool(#[from] PoolError),

  #[error(transparent)]
  System(#[from] SystemError),
}

/// What a boot achieved.
#[derive(Debug, Clone, Serialize)]
pub struct BootReport {
  pub desired: DesiredState,
  #[serde(skip)]
  pub address: Option<AddressOutcome>,
  #[serde(skip)]
  pub volume: Option<VolumeOutcome>,
  #[serde(skip)]
  pub ipv6: Option<Ipv6Outcome>,
  pub pool: Option<PoolReport>,
  /// Log file in use when the sequence ended.
  pub log_path: Option<PathBuf>,
  pub failed_sites: Vec<String>,
  /// The step that ended the sequence early, with its error.
  pub aborted: Option<(Step, String)>,
}

impl BootReport {
  fn new(desired: DesiredState) -> Self {
    Self {
      desired,
      address: None,
      volume: None,
      ipv6: None,
      pool: None,
      log_path: None,
      failed_sites: Vec::new(),
      aborted: None,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.aborted.is_none()
  }
}

/// Run the provisioning sequence.
///
/// `connect` builds the resource-control client once the region is known.
pub async fn boot<M, R, C, F>(
  settings: &Settings,
  metadata: &M,
  runner: &R,
  log: &LogService,
  connect: F,
) -> Result<BootReport, BootError>
where
  M: MetadataSource,
  R: CommandRunner,
  C: ResourceApi + TagStore,
  F: FnOnce(&Identity) -> C,
{
  let identity = fetch_identity(metadata, &settings.retry).await?;

  let temp_log = log_file_path(&settings.temp_log_base, &identity.instance_id, Local::now());
  match log.attach(&temp_log) {
    Ok(()) => info!(path = %temp_log.display(), "logging to temporary file"),
    Err(err) => warn!(error = %err, "cannot open temporary log file, logging to stderr only"),
  }
  info!(instance = %identity.instance_id, "starting provisioning");

  if let Err(err) = install_packages(runner, &settings.packages).await {
    error!(error = %err, "package installation failed, continuing with installed packages");
  }

  let cloud = connect(&identity);
  let tags = retry(&settings.retry, "fetch instance tags", || cloud.instance_tags(&identity.instance_id)).await?;
  let desired = DesiredState::from_tags(&identity, &tags)?;

  let mut report = BootReport::new(desired);
  if let Err((step, err)) = provision(settings, &cloud, runner, log, &mut report).await {
    error!(step = ?step, error = %err, "provisioning aborted");
    report.aborted = Some((step, err.to_string()));
  } else {
    info!("provisioning complete");
  }
  report.log_path = log.path();

  Ok(report)
}

async fn provision<C, R>(
  settings: &Settings,
  cloud: &C,
  runner: &R,
  log: &LogService,
  report: &mut BootReport,
) -> Result<(), (Step, StepError)>
where
  C: ResourceApi,
  R: CommandRunner,
{
  let desired = report.desired.clone();
  let instance = desired.instance_id.as_str();
  if let Some(ip) = &desired.elastic_ip {
    let outcome = reconcile_elastic_ip(cloud, instance, ip, &settings.retry)
      .await
      .map_err(|e| (Step::ElasticIp, StepError::from(e)))?;
    report.address = Some(outcome);
  }

  let outcome = reconcile_volume(
    cloud,
    instance,
    &desired.volume_id,
    &settings.volume.device,
    &settings.volume.wait,
    &settings.retry,
  )
  .await
  .map_err(|e| (Step::Volume, StepError::from(e)))?;
  report.volume = Some(outcome);

  match &desired.ipv6 {
    Some(address) => {
      let outcome = reconcile_ipv6(cloud, instance, address, &settings.retry)
        .await
        .map_err(|e| (Step::Ipv6, StepError::from(e)))?;
      report.ipv6 = Some(outcome);
    }
    None => warn!("no IPv6 address specified in instance tags"),
  }

  let pool = reconcile_pool(&ZfsPool::new(runner), &settings.pool, &settings.retry)
    .await
    .map_err(|e| (Step::Pool, StepError::from(e)))?;
  report.pool = Some(pool);

  // Bind sources may live on the pool: bind only once it is mounted.
  ensure_bind_mounts(runner, &settings.bind_mounts)
    .await
    .map_err(|e| (Step::BindMounts, StepError::from(e)))?;

  let final_log = log_file_path(desired.mount_point(), instance, Local::now());
  match log.relocate(&final_log) {
    Ok(path) => info!(path = %path.display(), "log file moved to final destination"),
    Err(err) => error!(error = %err, "log relocation failed, staying on temporary log"),
  }

  if settings.startup.enabled {
    report.failed_sites = run_startup(runner, &settings.startup, desired.mount_point())
      .await
      .map_err(|e| (Step::Startup, StepError::from(e)))?;
  }

  Ok(())
}
