use tracing::info;

use super::ReconcileError;
use crate::resources::ResourceApi;
use crate::retry::{RetryPolicy, retry};

/// What [`reconcile_elastic_ip`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOutcome {
  /// The address was already bound to the target. No mutation was issued.
  AlreadyAssociated,
  /// The address was bound to the target, taken from `previous_owner` if any.
  Associated { previous_owner: Option<String> },
}

/// Bind `elastic_ip` to `instance_id`, taking it away from any other holder.
///
/// The whole read-check-act sequence is retried as a unit.
pub async fn reconcile_elastic_ip<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  elastic_ip: &str,
  policy: &RetryPolicy,
) -> Result<AddressOutcome, ReconcileError> {
  retry(policy, "associate elastic ip", || associate_once(api, instance_id, elastic_ip)).await
}

async fn associate_once<A: ResourceApi>(
  api: &A,
  instance_id: &str,
  elastic_ip: &str,
) -> Result<AddressOutcome, ReconcileError> {
  let address = api.describe_address(elastic_ip).await?;

  let previous_owner = match address.owner() {
    Some(owner) if owner == instance_id => {
      info!(address = %elastic_ip, instance = %instance_id, "elastic ip already associated");
      return Ok(AddressOutcome::AlreadyAssociated);
    }
    Some(owner) => {
      let owner = owner.to_string();
      api.disassociate_address(&address).await?;
      info!(address = %elastic_ip, from = %owner, "elastic ip disassociated");
      Some(owner)
    }
    None => None,
  };

  api.associate_address(&address, instance_id).await?;
  info!(address = %elastic_ip, instance = %instance_id, "elastic ip associated");

  Ok(AddressOutcome::Associated { previous_owner })
}

#[cfg(test)]
mod tests {
  use std::num::NonZeroU32;
  use std::time::Duration;

  use super::*;
  use crate::util::testutil::{CloudCall, FakeCloud};

  fn policy() -> RetryPolicy {
    RetryPolicy::new(NonZeroU32::new(3).unwrap(), Duration::ZERO)
  }

  #[tokio::test]
  async fn unowned_address_is_associated_directly() {
    let cloud = FakeCloud::new().with_address("203.0.113.9", None);

    let outcome = reconcile_elastic_ip(&cloud, "i-self", "203.0.113.9", &policy()).await.unwrap();

    assert_eq!(outcome, AddressOutcome::Associated { previous_owner: None });
    assert_eq!(
      cloud.mutations(),
      vec![CloudCall::Associate {
        ip: "203.0.113.9".to_string(),
        instance: "i-self".to_string()
      }]
    );
  }

  #[tokio::test]
  async fn address_held_elsewhere_is_moved() {
    let cloud = FakeCloud::new().with_address("203.0.113.9", Some("i-other"));

    let outcome = reconcile_elastic_ip(&cloud, "i-self", "203.0.113.9", &policy()).await.unwrap();

    assert_eq!(
      outcome,
      AddressOutcome::Associated {
        previous_owner: Some("i-other".to_string())
      }
    );
    assert_eq!(
      cloud.mutations(),
      vec![
        CloudCall::Disassociate {
          ip: "203.0.113.9".to_string()
        },
        CloudCall::Associate {
          ip: "203.0.113.9".to_string(),
          instance: "i-self".to_string()
        },
      ]
    );
    assert_eq!(cloud.address_owner("203.0.113.9").as_deref(), Some("i-self"));
  }

  #[tokio::test]
  async fn second_run_is_a_pure_no_op() {
    let cloud = FakeCloud::new().with_address("203.0.113.9", Some("i-other"));

    reconcile_elastic_ip(&cloud, "i-self", "203.0.113.9", &policy()).await.unwrap();
    let mutations_after_first = cloud.mutations().len();
    let outcome = reconcile_elastic_ip(&cloud, "i-self", "203.0.113.9", &policy()).await.unwrap();

    assert_eq!(outcome, AddressOutcome::AlreadyAssociated);
    assert_eq!(mutations_after_first, 2);
    assert_eq!(cloud.mutations().len(), 2);
  }

  #[tokio::test]
  async fn transient_failure_rereads_before_acting() {
    let cloud = FakeCloud::new()
      .with_address("203.0.113.9", None)
      .failing("associate-address", 1);

    reconcile_elastic_ip(&cloud, "i-self", "203.0.113.9", &policy()).await.unwrap();

    let describes = cloud
      .calls()
      .iter()
      .filter(|c| matches!(c, CloudCall::DescribeAddress(_)))
      .count();
    assert_eq!(describes, 2);
    assert_eq!(cloud.address_owner("203.0.113.9").as_deref(), Some("i-self"));
  }

  #[tokio::test]
  async fn unknown_address_fails_after_retries() {
    let cloud = FakeCloud::new();

    let err = reconcile_elastic_ip(&cloud, "i-self", "198.51.100.1", &policy()).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Resource(_)));
    assert_eq!(cloud.calls().len(), 3);
  }
}
