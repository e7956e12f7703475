use std::net::Ipv6Addr;

use tracing::{error, info, warn};

use super::ReconcileError;
use crate::resources::ResourceApi;
use crate::retry::{RetryPolicy, retry_while};

/// What [`reconcile_ipv6`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ipv6Outcome {
  /// The address was already on the interface. No mutation was issued.
  AlreadyAssigned { interface_id: String },
  /// The address was added to the interface.
  Assigned { interface_id: String },
}

/// Canonical form of an IPv6 literal, so compressed and expanded spellings
/// of the same address compare equal.
pub fn normalize(address: &str) -> Option<Ipv6Addr> {
  address.trim().parse().ok()
}

/// Make sure `address` is assigned to the primary interface of `instance_id`.
///
/// An invalid address or an instance without interfaces is a configuration
/// problem and fails immediately instead of being retried.
pub async fn reconcile_ipv6<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  address: &str,
  policy: &RetryPolicy,
) -> Result<Ipv6Outcome, ReconcileError> {
  let desired = normalize(address).ok_or_else(|| ReconcileError::InvalidAddress {
    address: address.to_string(),
  })?;

  retry_while(
    policy,
    "assign ipv6 address",
    |err: &ReconcileError| !matches!(err, ReconcileError::NoNetworkInterface { .. }),
    || assign_once(api, instance_id, desired),
  )
  .await
  .inspect_err(|err| {
    if let ReconcileError::NoNetworkInterface { .. } = err {
      error!(instance = %instance_id, "no network interface to carry the ipv6 address");
    }
  })
}

async fn assign_once<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  desired: Ipv6Addr,
) -> Result<Ipv6Outcome, ReconcileError> {
  let interfaces = api.describe_network_interfaces(instance_id).await?;
  let interface = interfaces.first().ok_or_else(|| ReconcileError::NoNetworkInterface {
    instance_id: instance_id.to_string(),
  })?;

  let present = interface.ipv6_addresses.iter().any(|assigned| match normalize(assigned) {
    Some(existing) => existing == desired,
    None => {
      warn!(interface = %interface.id, address = %assigned, "ignoring unparseable ipv6 address");
      false
    }
  });

  if present {
    info!(address = %desired, interface = %interface.id, "ipv6 address already assigned");
    return Ok(Ipv6Outcome::AlreadyAssigned {
      interface_id: interface.id.clone(),
    });
  }

  api.assign_ipv6_address(&interface.id, &desired.to_string()).await?;
  info!(address = %desired, interface = %interface.id, instance = %instance_id, "ipv6 address assigned");

  Ok(Ipv6Outcome::Assigned {
    interface_id: interface.id.clone(),
  })
}
