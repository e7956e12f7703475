//! Test doubles for tether-lib.
//!
//! Scripted stand-ins for every external collaborator: the local command
//! runner, the resource-control API, the tag store and the metadata service.
//! Each one records the calls it receives.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::exec::{CommandRunner, CommandSpec, ExecError};
use crate::metadata::{InstanceAction, MetadataError, MetadataSource, Token};
use crate::resources::{
  AddressRecord, NetworkInterface, ResourceApi, ResourceError, TagStore, VolumeAttachment, VolumeRecord,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Commands
// =============================================================================

/// Answers commands by prefix match on their rendered command line.
///
/// Each rule holds a queue of replies; the last reply repeats once the queue
/// is down to one. Commands matching no rule succeed with empty stdout.
#[derive(Default)]
pub struct ScriptedRunner {
  rules: Mutex<Vec<(String, VecDeque<Result<String, String>>)>>,
  calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a reply for commands starting with `prefix`.
  ///
  /// `Err` carries the stderr of a failed exit.
  pub fn on(self, prefix: &str, reply: Result<&str, &str>) -> Self {
    let reply = reply.map(str::to_string).map_err(str::to_string);
    {
      let mut rules = lock(&self.rules);
      match rules.iter_mut().find(|(p, _)| p == prefix) {
        Some((_, queue)) => queue.push_back(reply),
        None => rules.push((prefix.to_string(), VecDeque::from([reply]))),
      }
    }
    self
  }

  pub fn calls(&self) -> Vec<CommandSpec> {
    lock(&self.calls).clone()
  }

  /// Rendered command lines, in call order.
  pub fn command_lines(&self) -> Vec<String> {
    self.calls().iter().map(ToString::to_string).collect()
  }
}

impl CommandRunner for ScriptedRunner {
  async fn run(&self, spec: &CommandSpec) -> Result<String, ExecError> {
    lock(&self.calls).push(spec.clone());
    let line = spec.to_string();

    let reply = {
      let mut rules = lock(&self.rules);
      rules.iter_mut().find(|(prefix, _)| line.starts_with(prefix.as_str())).map(|(_, queue)| {
        if queue.len() > 1 {
          queue.pop_front().unwrap_or_else(|| Ok(String::new()))
        } else {
          queue.front().cloned().unwrap_or_else(|| Ok(String::new()))
        }
      })
    };

    match reply.unwrap_or_else(|| Ok(String::new())) {
      Ok(stdout) => Ok(stdout),
      Err(stderr) => Err(ExecError::Failed {
        cmd: line,
        code: Some(1),
        stderr,
      }),
    }
  }
}

// =============================================================================
// Cloud
// =============================================================================

/// A call received by [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
  DescribeAddress(String),
  Associate { ip: String, instance: String },
  Disassociate { ip: String },
  DescribeVolume(String),
  Attach { volume: String, instance: String, device: String },
  DescribeInterfaces(String),
  AssignIpv6 { interface: String, address: String },
  DescribeTags(String),
}

impl CloudCall {
  pub fn is_mutation(&self) -> bool {
    matches!(
      self,
      CloudCall::Associate { .. } | CloudCall::Disassociate { .. } | CloudCall::Attach { .. } | CloudCall::AssignIpv6 { .. }
    )
  }
}

struct FakeVolume {
  attachments: Vec<VolumeAttachment>,
  /// Describes remaining until the current holder lets go.
  release_after: Option<usize>,
}

#[derive(Default)]
struct CloudState {
  addresses: HashMap<String, AddressRecord>,
  volumes: HashMap<String, FakeVolume>,
  interfaces: HashMap<String, Vec<NetworkInterface>>,
  tags: HashMap<String, BTreeMap<String, String>>,
  failures: HashMap<&'static str, usize>,
  calls: Vec<CloudCall>,
}

/// In-memory resource-control API and tag store.
#[derive(Default)]
pub struct FakeCloud {
  state: Mutex<CloudState>,
}

impl FakeCloud {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_address(self, ip: &str, owner: Option<&str>) -> Self {
    lock(&self.state).addresses.insert(
      ip.to_string(),
      AddressRecord {
        public_ip: ip.to_string(),
        allocation_id: Some(format!("eipalloc-{}", ip.replace('.', ""))),
        association_id: owner.map(|o| format!("eipassoc-{}", o)),
        instance_id: owner.map(str::to_string),
      },
    );
    self
  }

  /// Register a volume. A holder given with `release_after = Some(n)` detaches
  /// once `n` describes have observed it.
  pub fn with_volume(self, volume: &str, holder: Option<&str>, release_after: Option<usize>) -> Self {
    let attachments = holder
      .map(|h| {
        vec![VolumeAttachment {
          instance_id: h.to_string(),
          device: Some("/dev/sdf".to_string()),
          state: Some("attached".to_string()),
        }]
      })
      .unwrap_or_default();
    lock(&self.state).volumes.insert(
      volume.to_string(),
      FakeVolume {
        attachments,
        release_after,
      },
    );
    self
  }

  pub fn with_interface(self, instance: &str, interface: &str, ipv6: &[&str]) -> Self {
    lock(&self.state)
      .interfaces
      .entry(instance.to_string())
      .or_default()
      .push(NetworkInterface {
        id: interface.to_string(),
        ipv6_addresses: ipv6.iter().map(|a| a.to_string()).collect(),
      });
    self
  }

  pub fn with_tags(self, instance: &str, tags: &[(&str, &str)]) -> Self {
    lock(&self.state).tags.insert(
      instance.to_string(),
      tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    );
    self
  }

  /// Make the next `times` calls of `call` fail.
  pub fn failing(self, call: &'static str, times: usize) -> Self {
    lock(&self.state).failures.insert(call, times);
    self
  }

  pub fn calls(&self) -> Vec<CloudCall> {
    lock(&self.state).calls.clone()
  }

  pub fn mutations(&self) -> Vec<CloudCall> {
    self.calls().into_iter().filter(CloudCall::is_mutation).collect()
  }

  pub fn address_owner(&self, ip: &str) -> Option<String> {
    lock(&self.state).addresses.get(ip).and_then(|a| a.instance_id.clone())
  }

  pub fn volume_holders(&self, volume: &str) -> Vec<String> {
    lock(&self.state)
      .volumes
      .get(volume)
      .map(|v| v.attachments.iter().map(|a| a.instance_id.clone()).collect())
      .unwrap_or_default()
  }

  pub fn interface_addresses(&self, instance: &str) -> Vec<String> {
    lock(&self.state)
      .interfaces
      .get(instance)
      .and_then(|i| i.first())
      .map(|i| i.ipv6_addresses.clone())
      .unwrap_or_default()
  }

  fn enter(&self, name: &'static str, call: CloudCall) -> Result<std::sync::MutexGuard<'_, CloudState>, ResourceError> {
    let mut state = lock(&self.state);
    state.calls.push(call);
    if let Some(remaining) = state.failures.get_mut(name)
      && *remaining > 0
    {
      *remaining -= 1;
      return Err(ResourceError::Call {
        call: name,
        source: ExecError::Failed {
          cmd: name.to_string(),
          code: Some(255),
          stderr: "injected failure".to_string(),
        },
      });
    }
    Ok(state)
  }
}

impl ResourceApi for FakeCloud {
  async fn describe_address(&self, public_ip: &str) -> Result<AddressRecord, ResourceError> {
    let state = self.enter("describe-addresses", CloudCall::DescribeAddress(public_ip.to_string()))?;
    state.addresses.get(public_ip).cloned().ok_or_else(|| ResourceError::NotFound {
      kind: "address",
      id: public_ip.to_string(),
    })
  }

  async fn associate_address(&self, address: &AddressRecord, instance_id: &str) -> Result<(), ResourceError> {
    let mut state = self.enter(
      "associate-address",
      CloudCall::Associate {
        ip: address.public_ip.clone(),
        instance: instance_id.to_string(),
      },
    )?;
    if let Some(record) = state.addresses.get_mut(&address.public_ip) {
      record.instance_id = Some(instance_id.to_string());
      record.association_id = Some(format!("eipassoc-{}", instance_id));
    }
    Ok(())
  }

  async fn disassociate_address(&self, address: &AddressRecord) -> Result<(), ResourceError> {
    let mut state = self.enter(
      "disassociate-address",
      CloudCall::Disassociate {
        ip: address.public_ip.clone(),
      },
    )?;
    if let Some(record) = state.addresses.get_mut(&address.public_ip) {
      record.instance_id = None;
      record.association_id = None;
    }
    Ok(())
  }

  async fn describe_volume(&self, volume_id: &str) -> Result<VolumeRecord, ResourceError> {
    let mut state = self.enter("describe-volumes", CloudCall::DescribeVolume(volume_id.to_string()))?;
    let volume = state.volumes.get_mut(volume_id).ok_or_else(|| ResourceError::NotFound {
      kind: "volume",
      id: volume_id.to_string(),
    })?;
    let record = VolumeRecord {
      volume_id: volume_id.to_string(),
      attachments: volume.attachments.clone(),
    };
    if let Some(remaining) = volume.release_after.as_mut() {
      *remaining = remaining.saturating_sub(1);
      if *remaining == 0 {
        volume.attachments.clear();
        volume.release_after = None;
      }
    }
    Ok(record)
  }

  async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<(), ResourceError> {
    let mut state = self.enter(
      "attach-volume",
      CloudCall::Attach {
        volume: volume_id.to_string(),
        instance: instance_id.to_string(),
        device: device.to_string(),
      },
    )?;
    if let Some(volume) = state.volumes.get_mut(volume_id) {
      volume.attachments.push(VolumeAttachment {
        instance_id: instance_id.to_string(),
        device: Some(device.to_string()),
        state: Some("attaching".to_string()),
      });
    }
    Ok(())
  }

  async fn describe_network_interfaces(&self, instance_id: &str) -> Result<Vec<NetworkInterface>, ResourceError> {
    let state = self.enter(
      "describe-network-interfaces",
      CloudCall::DescribeInterfaces(instance_id.to_string()),
    )?;
    Ok(state.interfaces.get(instance_id).cloned().unwrap_or_default())
  }

  async fn assign_ipv6_address(&self, interface_id: &str, address: &str) -> Result<(), ResourceError> {
    let mut state = self.enter(
      "assign-ipv6-addresses",
      CloudCall::AssignIpv6 {
        interface: interface_id.to_string(),
        address: address.to_string(),
      },
    )?;
    for interface in state.interfaces.values_mut().flatten() {
      if interface.id == interface_id {
        interface.ipv6_addresses.push(address.to_string());
      }
    }
    Ok(())
  }
}

impl TagStore for FakeCloud {
  async fn instance_tags(&self, instance_id: &str) -> Result<BTreeMap<String, String>, ResourceError> {
    let state = self.enter("describe-tags", CloudCall::DescribeTags(instance_id.to_string()))?;
    Ok(state.tags.get(instance_id).cloned().unwrap_or_default())
  }
}

// =============================================================================
// Metadata
// =============================================================================

/// A scripted reply from the spot notice endpoint.
#[derive(Debug, Clone)]
pub enum SpotReply {
  Nothing,
  Notice(InstanceAction),
  Unreachable,
  Garbage,
}

/// In-memory metadata service.
#[derive(Default)]
pub struct FakeMetadata {
  values: HashMap<String, String>,
  spot: Mutex<VecDeque<SpotReply>>,
  unreachable: bool,
  tokens_issued: Mutex<usize>,
}

impl FakeMetadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: &str, value: &str) -> Self {
    self.values.insert(key.to_string(), value.to_string());
    self
  }

  /// Every call fails as if the service were down.
  pub fn unreachable(mut self) -> Self {
    self.unreachable = true;
    self
  }

  /// Queue spot replies; the last one repeats.
  pub fn with_spot(self, replies: impl IntoIterator<Item = SpotReply>) -> Self {
    lock(&self.spot).extend(replies);
    self
  }

  pub fn tokens_issued(&self) -> usize {
    *lock(&self.tokens_issued)
  }

  fn down(key: &str) -> MetadataError {
    MetadataError::Status {
      key: key.to_string(),
      status: 503,
    }
  }
}

impl MetadataSource for FakeMetadata {
  async fn token(&self) -> Result<Token, MetadataError> {
    if self.unreachable {
      return Err(Self::down("api/token"));
    }
    let mut issued = lock(&self.tokens_issued);
    *issued += 1;
    Ok(Token::new(format!("token-{}", *issued)))
  }

  async fn get(&self, key: &str, _token: &Token) -> Result<String, MetadataError> {
    if self.unreachable {
      return Err(Self::down(key));
    }
    self.values.get(key).cloned().ok_or_else(|| MetadataError::Status {
      key: key.to_string(),
      status: 404,
    })
  }

  async fn instance_action(&self, _token: &Token) -> Result<Option<InstanceAction>, MetadataError> {
    let reply = {
      let mut spot = lock(&self.spot);
      if spot.len() > 1 {
        spot.pop_front()
      } else {
        spot.front().cloned()
      }
    };
    match reply.unwrap_or(SpotReply::Nothing) {
      SpotReply::Nothing => Ok(None),
      SpotReply::Notice(action) => Ok(Some(action)),
      SpotReply::Unreachable => Err(Self::down(crate::metadata::KEY_SPOT_ACTION)),
      SpotReply::Garbage => Err(MetadataError::Malformed {
        key: crate::metadata::KEY_SPOT_ACTION.to_string(),
        message: "expected value".to_string(),
      }),
    }
  }
}
