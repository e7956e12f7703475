//! Idempotent reconciliation of the shared cloud resources.
//!
//! Each procedure re-reads the current holder, compares it with the target
//! instance and only then mutates. The resource-control API offers no
//! compare-and-swap, so another writer can slip in between the read and the
//! write; correctness rests on every procedure being safe to re-run, not on
//! that window being closed.

mod address;
mod ipv6;
mod volume;

use std::time::Duration;

use thiserror::Error;

use crate::resources::ResourceError;

pub use address::{AddressOutcome, reconcile_elastic_ip};
pub use ipv6::{Ipv6Outcome, normalize as normalize_ipv6, reconcile_ipv6};
pub use volume::{VolumeOutcome, VolumeWait, reconcile_volume};

/// Errors that can occur while reconciling a resource.
#[derive(Debug, Error)]
pub enum ReconcileError {
  /// A resource-control call failed.
  #[error(transparent)]
  Resource(#[from] ResourceError),

  /// The instance has no network interface to carry the address.
  #[error("no network interface found for instance {instance_id}")]
  NoNetworkInterface { instance_id: String },

  /// The desired address is not a valid IPv6 literal.
  #[error("invalid IPv6 address '{address}'")]
  InvalidAddress { address: String },

  /// The volume stayed attached elsewhere for longer than allowed.
  #[error("volume {volume_id} still held by {holder} after {waited:?}")]
  VolumeContention {
    volume_id: String,
    holder: String,
    waited: Duration,
  },
}
