use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::ReconcileError;
use crate::resources::ResourceApi;
use crate::retry::{RetryPolicy, retry_while, secs};

/// How long to wait for another instance to release a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VolumeWait {
  /// Delay between attachment checks while the volume is held elsewhere.
  #[serde(rename = "poll_secs", with = "secs")]
  pub poll: Duration,
  /// Give up once the volume has been held elsewhere for this long, counted
  /// across all attempts.
  #[serde(rename = "max_wait_secs", with = "secs")]
  pub max_wait: Duration,
}

impl Default for VolumeWait {
  fn default() -> Self {
    Self {
      poll: Duration::from_secs(5),
      max_wait: Duration::from_secs(600),
    }
  }
}

/// What [`reconcile_volume`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeOutcome {
  /// The volume was already attached to the target. No mutation was issued.
  AlreadyAttached,
  /// The volume was attached after waiting `waited` for other holders.
  Attached { waited: Duration },
}

/// Attach `volume_id` to `instance_id` at `device`.
///
/// A volume attached to another instance is never force-detached: the
/// procedure polls until the holder (typically a terminating sibling)
/// releases it. The wait is measured from the first attempt and ends with
/// [`ReconcileError::VolumeContention`] once it exceeds `wait.max_wait`;
/// contention is not retried. The retry policy bounds failed calls only.
pub async fn reconcile_volume<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  volume_id: &str,
  device: &str,
  wait: &VolumeWait,
  policy: &RetryPolicy,
) -> Result<VolumeOutcome, ReconcileError> {
  let started = Instant::now();
  retry_while(
    policy,
    "attach volume",
    |err: &ReconcileError| !matches!(err, ReconcileError::VolumeContention { .. }),
    || attach_when_free(api, instance_id, volume_id, device, wait, started),
  )
  .await
}

async fn attach_when_free<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  volume_id: &str,
  device: &str,
  wait: &VolumeWait,
  started: Instant,
) -> Result<VolumeOutcome, ReconcileError> {
  loop {
    let volume = api.describe_volume(volume_id).await?;

    if volume.attachments.is_empty() {
      api.attach_volume(volume_id, instance_id, device).await?;
      let waited = started.elapsed();
      info!(volume = %volume_id, instance = %instance_id, device, "volume attached");
      return Ok(VolumeOutcome::Attached { waited });
    }

    if volume.is_attached_to(instance_id) {
      info!(volume = %volume_id, instance = %instance_id, "volume already attached");
      return Ok(VolumeOutcome::AlreadyAttached);
    }

    let holder = volume.other_holders(instance_id).collect::<Vec<_>>().join(",");
    let waited = started.elapsed();
    if waited >= wait.max_wait {
      return Err(ReconcileError::VolumeContention {
        volume_id: volume_id.to_string(),
        holder,
        waited,
      });
    }

    warn!(volume = %volume_id, holder = %holder, waited = ?waited, "volume attached to another instance, waiting");
    tokio::time::sleep(wait.poll).await;
  }
}
