//! Resource-control API backed by the `aws` command line client.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{AddressRecord, NetworkInterface, ResourceApi, ResourceError, TagStore, VolumeRecord};
use crate::exec::{CommandRunner, CommandSpec};

/// Drives `aws ec2 ...` through a [`CommandRunner`], one region per client.
#[derive(Debug, Clone)]
pub struct AwsCli<R> {
  runner: R,
  program: String,
  region: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAddresses {
  #[serde(default)]
  addresses: Vec<AddressRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumes {
  #[serde(default)]
  volumes: Vec<VolumeRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeNetworkInterfaces {
  #[serde(default)]
  network_interfaces: Vec<RawInterface>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInterface {
  network_interface_id: String,
  #[serde(default)]
  attachment: Option<RawInterfaceAttachment>,
  #[serde(default)]
  ipv6_addresses: Vec<RawIpv6>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInterfaceAttachment {
  #[serde(default)]
  device_index: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawIpv6 {
  ipv6_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTags {
  #[serde(default)]
  tags: Vec<RawTag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTag {
  key: String,
  #[serde(default)]
  value: String,
}

impl<R: CommandRunner> AwsCli<R> {
  pub fn new(runner: R, program: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      runner,
      program: program.into(),
      region: region.into(),
    }
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  fn ec2(&self, operation: &str) -> CommandSpec {
    CommandSpec::new(&self.program)
      .args(["ec2", operation])
      .args(["--region", self.region.as_str()])
      .args(["--output", "json"])
  }

  async fn call(&self, call: &'static str, spec: CommandSpec) -> Result<String, ResourceError> {
    debug!(call, cmd = %spec, "resource api call");
    self
      .runner
      .run(&spec)
      .await
      .map_err(|source| ResourceError::Call { call, source })
  }

  async fn query<T: DeserializeOwned>(&self, call: &'static str, spec: CommandSpec) -> Result<T, ResourceError> {
    let body = self.call(call, spec).await?;
    serde_json::from_str(&body).map_err(|source| ResourceError::Decode { call, source })
  }
}

impl<R: CommandRunner> ResourceApi for AwsCli<R> {
  async fn describe_address(&self, public_ip: &str) -> Result<AddressRecord, ResourceError> {
    let spec = self.ec2("describe-addresses").args(["--public-ips", public_ip]);
    let response: DescribeAddresses = self.query("describe-addresses", spec).await?;
    response
      .addresses
      .into_iter()
      .find(|a| a.public_ip == public_ip)
      .ok_or_else(|| ResourceError::NotFound {
        kind: "address",
        id: public_ip.to_string(),
      })
  }

  async fn associate_address(&self, address: &AddressRecord, instance_id: &str) -> Result<(), ResourceError> {
    let spec = self.ec2("associate-address").args(["--instance-id", instance_id]);
    let spec = match &address.allocation_id {
      Some(allocation) => spec.args(["--allocation-id", allocation.as_str()]),
      None => spec.args(["--public-ip", address.public_ip.as_str()]),
    };
    self.call("associate-address", spec).await.map(|_| ())
  }

  async fn disassociate_address(&self, address: &AddressRecord) -> Result<(), ResourceError> {
    let spec = self.ec2("disassociate-address");
    let spec = match &address.association_id {
      Some(association) => spec.args(["--association-id", association.as_str()]),
      None => spec.args(["--public-ip", address.public_ip.as_str()]),
    };
    self.call("disassociate-address", spec).await.map(|_| ())
  }

  async fn describe_volume(&self, volume_id: &str) -> Result<VolumeRecord, ResourceError> {
    let spec = self.ec2("describe-volumes").args(["--volume-ids", volume_id]);
    let response: DescribeVolumes = self.query("describe-volumes", spec).await?;
    response
      .volumes
      .into_iter()
      .find(|v| v.volume_id == volume_id)
      .ok_or_else(|| ResourceError::NotFound {
        kind: "volume",
        id: volume_id.to_string(),
      })
  }

  async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<(), ResourceError> {
    let spec = self.ec2("attach-volume").args([
      "--volume-id",
      volume_id,
      "--instance-id",
      instance_id,
      "--device",
      device,
    ]);
    self.call("attach-volume", spec).await.map(|_| ())
  }

  async fn describe_network_interfaces(&self, instance_id: &str) -> Result<Vec<NetworkInterface>, ResourceError> {
    let filter = format!("Name=attachment.instance-id,Values={}", instance_id);
    let spec = self
      .ec2("describe-network-interfaces")
      .args(["--filters".to_string(), filter]);
    let response: DescribeNetworkInterfaces = self.query("describe-network-interfaces", spec).await?;

    let mut raw = response.network_interfaces;
    raw.sort_by_key(|i| i.attachment.as_ref().and_then(|a| a.device_index).unwrap_or(u32::MAX));
    Ok(
      raw
        .into_iter()
        .map(|i| NetworkInterface {
          id: i.network_interface_id,
          ipv6_addresses: i.ipv6_addresses.into_iter().map(|a| a.ipv6_address).collect(),
        })
        .collect(),
    )
  }

  async fn assign_ipv6_address(&self, interface_id: &str, address: &str) -> Result<(), ResourceError> {
    let spec = self.ec2("assign-ipv6-addresses").args([
      "--network-interface-id",
      interface_id,
      "--ipv6-addresses",
      address,
    ]);
    self.call("assign-ipv6-addresses", spec).await.map(|_| ())
  }
}

impl<R: CommandRunner> TagStore for AwsCli<R> {
  async fn instance_tags(&self, instance_id: &str) -> Result<BTreeMap<String, String>, ResourceError> {
    let filter = format!("Name=resource-id,Values={}", instance_id);
    let spec = self.ec2("describe-tags").args(["--filters".to_string(), filter]);
    let response: DescribeTags = self.query("describe-tags", spec).await?;
    Ok(response.tags.into_iter().map(|t| (t.key, t.value)).collect())
  }
}
