//! Instance identity and desired-state resolution.
//!
//! Turns metadata facts and instance tags into a [`DesiredState`]. The
//! region is derived from the availability zone under the invariant
//! "availability zone = region + exactly one trailing letter", which is
//! checked rather than assumed.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::metadata::{KEY_AVAILABILITY_ZONE, KEY_INSTANCE_ID, MetadataError, MetadataSource, Token};
use crate::reconcile::normalize_ipv6;
use crate::retry::{RetryPolicy, retry};

/// Tag naming the elastic address to hold.
pub const TAG_ELASTIC_IP: &str = "ElasticIP";
/// Tag naming the persistent block volume. Required.
pub const TAG_VOLUME_ID: &str = "EBSVolumeID";
/// Tag naming where the persistent volume's data is mounted.
pub const TAG_MOUNT_POINT: &str = "EBSMountPoint";
/// Tag naming the IPv6 address to hold.
pub const TAG_IPV6_ADDRESS: &str = "IPv6Address";

/// Mount point used when the instance carries no mount point tag.
pub const DEFAULT_MOUNT_POINT: &str = "/rontor/main";

/// Errors in identity facts or declared configuration.
///
/// These are fatal for a boot: nothing downstream can be reconciled without
/// a valid desired state.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("metadata unavailable: {0}")]
  Metadata(#[from] MetadataError),

  #[error("required tag '{key}' missing on instance {instance_id}")]
  MissingTag { key: &'static str, instance_id: String },

  #[error("tag '{key}' has invalid value '{value}': {reason}")]
  InvalidTag {
    key: &'static str,
    value: String,
    reason: &'static str,
  },

  #[error("availability zone '{zone}' is not a region followed by one zone letter")]
  InvalidAvailabilityZone { zone: String },
}

/// Facts the metadata service reports about this instance.
#[derive(Debug, Clone)]
pub struct Identity {
  pub token: Token,
  pub instance_id: String,
  pub availability_zone: String,
  pub region: String,
}

/// Everything this instance should hold, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
  pub instance_id: String,
  pub region: String,
  pub elastic_ip: Option<String>,
  pub volume_id: String,
  pub ipv6: Option<String>,
  pub mount_point: PathBuf,
}

/// Derive the region from an availability zone such as `us-east-1a`.
pub fn region_from_availability_zone(zone: &str) -> Result<String, ConfigError> {
  let invalid = || ConfigError::InvalidAvailabilityZone { zone: zone.to_string() };

  let mut chars = zone.chars();
  let letter = chars.next_back().ok_or_else(invalid)?;
  let region = chars.as_str();
  let region_ok = region.ends_with(|c: char| c.is_ascii_digit())
    && region.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

  if !letter.is_ascii_lowercase() || !region_ok {
    return Err(invalid());
  }
  Ok(region.to_string())
}

async fn read_placement<M: MetadataSource>(metadata: &M) -> Result<(Token, String, String), MetadataError> {
  let token = metadata.token().await?;
  let instance_id = metadata.get(KEY_INSTANCE_ID, &token).await?;
  let availability_zone = metadata.get(KEY_AVAILABILITY_ZONE, &token).await?;
  Ok((token, instance_id, availability_zone))
}

/// Read instance id and placement from the metadata service.
///
/// Only the metadata reads are retried. A malformed availability zone fails
/// on the first answer.
pub async fn fetch_identity<M: MetadataSource>(metadata: &M, policy: &RetryPolicy) -> Result<Identity, ConfigError> {
  let (token, instance_id, availability_zone) = retry(policy, "fetch identity", || read_placement(metadata)).await?;
  let region = region_from_availability_zone(&availability_zone)?;

  info!(instance = %instance_id, zone = %availability_zone, region = %region, "resolved instance identity");

  Ok(Identity {
    token,
    instance_id,
    availability_zone,
    region,
  })
}

impl DesiredState {
  /// Build the desired state from identity facts and instance tags.
  pub fn from_tags(identity: &Identity, tags: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
    let tag = |key: &str| tags.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let volume_id = tag(TAG_VOLUME_ID).ok_or_else(|| ConfigError::MissingTag {
      key: TAG_VOLUME_ID,
      instance_id: identity.instance_id.clone(),
    })?;

    let elastic_ip = match tag(TAG_ELASTIC_IP) {
      Some(ip) if ip.parse::<IpAddr>().is_err() => {
        return Err(ConfigError::InvalidTag {
          key: TAG_ELASTIC_IP,
          value: ip.to_string(),
          reason: "not an IP address",
        });
      }
      other => other.map(str::to_string),
    };

    let ipv6 = match tag(TAG_IPV6_ADDRESS) {
      Some(addr) if normalize_ipv6(addr).is_none() => {
        return Err(ConfigError::InvalidTag {
          key: TAG_IPV6_ADDRESS,
          value: addr.to_string(),
          reason: "not an IPv6 address",
        });
      }
      other => other.map(str::to_string),
    };

    let mount_point = PathBuf::from(tag(TAG_MOUNT_POINT).unwrap_or(DEFAULT_MOUNT_POINT));
    if !mount_point.is_absolute() {
      return Err(ConfigError::InvalidTag {
        key: TAG_MOUNT_POINT,
        value: mount_point.display().to_string(),
        reason: "not an absolute path",
      });
    }

    if elastic_ip.is_none() {
      warn!("no elastic ip declared in instance tags");
    }

    Ok(Self {
      instance_id: identity.instance_id.clone(),
      region: identity.region.clone(),
      elastic_ip,
      volume_id: volume_id.to_string(),
      ipv6,
      mount_point,
    })
  }

  pub fn mount_point(&self) -> &Path {
    &self.mount_point
  }
}
