//! The resource-control API and tag store.
//!
//! The traits describe only the calls reconciliation needs. [`AwsCli`] is
//! the production implementation; tests use an in-memory fake.

mod aws_cli;
mod types;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::exec::ExecError;

pub use aws_cli::AwsCli;
pub use types::{AddressRecord, NetworkInterface, VolumeAttachment, VolumeRecord};

/// Errors reported by the resource-control API or the tag store.
#[derive(Debug, Error)]
pub enum ResourceError {
  /// The underlying call failed.
  #[error("{call} failed: {source}")]
  Call {
    call: &'static str,
    #[source]
    source: ExecError,
  },

  /// The call succeeded but the response could not be decoded.
  #[error("{call} returned an unreadable response: {source}")]
  Decode {
    call: &'static str,
    #[source]
    source: serde_json::Error,
  },

  /// The queried resource does not exist.
  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: String },
}

/// Query and mutate attachment state of addresses, volumes and interfaces.
///
/// No call is conditional: there is no compare-and-swap, so a holder may
/// change between a describe and the following mutation.
#[allow(async_fn_in_trait)]
pub trait ResourceApi {
  async fn describe_address(&self, public_ip: &str) -> Result<AddressRecord, ResourceError>;

  async fn associate_address(&self, address: &AddressRecord, instance_id: &str) -> Result<(), ResourceError>;

  async fn disassociate_address(&self, address: &AddressRecord) -> Result<(), ResourceError>;

  async fn describe_volume(&self, volume_id: &str) -> Result<VolumeRecord, ResourceError>;

  async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<(), ResourceError>;

  /// Interfaces attached to the instance, primary first.
  async fn describe_network_interfaces(&self, instance_id: &str) -> Result<Vec<NetworkInterface>, ResourceError>;

  async fn assign_ipv6_address(&self, interface_id: &str, address: &str) -> Result<(), ResourceError>;
}

/// Declarative per-instance configuration.
#[allow(async_fn_in_trait)]
pub trait TagStore {
  async fn instance_tags(&self, instance_id: &str) -> Result<BTreeMap<String, String>, ResourceError>;
}

impl<T: ResourceApi + ?Sized> ResourceApi for &T {
  async fn describe_address(&self, public_ip: &str) -> Result<AddressRecord, ResourceError> {
    (**self).describe_address(public_ip).await
  }

  async fn associate_address(&self, address: &AddressRecord, instance_id: &str) -> Result<(), ResourceError> {
    (**self).associate_address(address, instance_id).await
  }

  async fn disassociate_address(&self, address: &AddressRecord) -> Result<(), ResourceError> {
    (**self).disassociate_address(address).await
  }

  async fn describe_volume(&self, volume_id: &str) -> Result<VolumeRecord, ResourceError> {
    (**self).describe_volume(volume_id).await
  }

  async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<(), ResourceError> {
    (**self).attach_volume(volume_id, instance_id, device).await
  }

  async fn describe_network_interfaces(&self, instance_id: &str) -> Result<Vec<NetworkInterface>, ResourceError> {
    (**self).describe_network_interfaces(instance_id).await
  }

  async fn assign_ipv6_address(&self, interface_id: &str, address: &str) -> Result<(), ResourceError> {
    (**self).assign_ipv6_address(interface_id, address).await
  }
}

impl<T: TagStore + ?Sized> TagStore for &T {
  async fn instance_tags(&self, instance_id: &str) -> Result<BTreeMap<String, String>, ResourceError> {
    (**self).instance_tags(instance_id).await
  }
}
