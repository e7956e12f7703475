//! Observed attachment state of shared cloud resources.
//!
//! These records are snapshots. Nothing holds on to them across
//! reconciliation attempts; every attempt re-reads.

use serde::Deserialize;

/// An elastic address and whoever currently holds it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddressRecord {
  pub public_ip: String,
  #[serde(default)]
  pub allocation_id: Option<String>,
  #[serde(default)]
  pub association_id: Option<String>,
  #[serde(default)]
  pub instance_id: Option<String>,
}

impl AddressRecord {
  /// The instance currently holding the address, if any.
  pub fn owner(&self) -> Option<&str> {
    self.instance_id.as_deref().filter(|id| !id.is_empty())
  }
}

/// One attachment of a block volume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeAttachment {
  pub instance_id: String,
  #[serde(default)]
  pub device: Option<String>,
  #[serde(default)]
  pub state: Option<String>,
}

/// A block volume and its current attachments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRecord {
  pub volume_id: String,
  #[serde(default)]
  pub attachments: Vec<VolumeAttachment>,
}

impl VolumeRecord {
  pub fn is_attached_to(&self, instance_id: &str) -> bool {
    self.attachments.iter().any(|a| a.instance_id == instance_id)
  }

  /// Instances other than `instance_id` holding the volume.
  pub fn other_holders<'a>(&'a self, instance_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .attachments
      .iter()
      .filter(move |a| a.instance_id != instance_id)
      .map(|a| a.instance_id.as_str())
  }
}

/// A network interface and the IPv6 addresses assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
  pub id: String,
  pub ipv6_addresses: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_instance_id_means_unowned() {
    let record = AddressRecord {
      public_ip: "203.0.113.9".to_string(),
      allocation_id: None,
      association_id: None,
      instance_id: Some(String::new()),
    };
    assert_eq!(record.owner(), None);
  }

  #[test]
  fn attachment_lookup() {
    let record: VolumeRecord = serde_json::from_str(
      r#"{"VolumeId":"vol-123","Attachments":[{"InstanceId":"i-a","Device":"/dev/sdf","State":"detaching"}]}"#,
    )
    .unwrap();
    assert!(!record.is_attached_to("i-b"));
    assert!(record.is_attached_to("i-a"));
    assert_eq!(record.other_holders("i-b").collect::<Vec<_>>(), vec!["i-a"]);
  }
}
