//! Local storage pool reconciliation.
//!
//! The persistent volume carries an importable pool with one or more
//! datasets. After the volume is attached, datasets that are not mounted
//! trigger a forced import; the previous holder may have died without a
//! clean export.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::exec::{CommandRunner, CommandSpec, ExecError};
use crate::retry::{RetryPolicy, retry};

/// Errors that can occur while reconciling the storage pool.
#[derive(Debug, Error)]
pub enum PoolError {
  /// Importing the pool failed on every attempt.
  #[error("failed to import pool '{pool}': {source}")]
  Import {
    pool: String,
    #[source]
    source: ExecError,
  },
}

/// Pool name and the datasets expected to be mounted, in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  pub name: String,
  pub datasets: Vec<String>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: "rontor".to_string(),
      datasets: vec!["rontor/main".to_string()],
    }
  }
}

/// Mount state of datasets after reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
  /// Whether an import was performed.
  pub imported: bool,
  pub mounted: Vec<String>,
  /// Datasets still unmounted after import. Reported, not an error.
  pub unmounted: Vec<String>,
}

/// Pool operations needed for reconciliation.
#[allow(async_fn_in_trait)]
pub trait StoragePool {
  async fn is_mounted(&self, dataset: &str) -> Result<bool, ExecError>;

  /// Force-import the pool.
  async fn import(&self, pool: &str) -> Result<(), ExecError>;
}

/// ZFS implementation over `zfs` and `zpool`.
#[derive(Debug, Clone)]
pub struct ZfsPool<R> {
  runner: R,
}

impl<R: CommandRunner> ZfsPool<R> {
  pub fn new(runner: R) -> Self {
    Self { runner }
  }
}

impl<R: CommandRunner> StoragePool for ZfsPool<R> {
  async fn is_mounted(&self, dataset: &str) -> Result<bool, ExecError> {
    let spec = CommandSpec::new("zfs").args(["list", "-H", "-o", "mounted", dataset]);
    let out = self.runner.run(&spec).await?;
    Ok(out.trim() == "yes")
  }

  async fn import(&self, pool: &str) -> Result<(), ExecError> {
    let spec = CommandSpec::new("zpool").args(["import", "-f", pool]);
    self.runner.run(&spec).await.map(|_| ())
  }
}

/// A failed status query counts as "not mounted": the safe direction is an
/// extra import, not a false success.
async fn mounted<P: StoragePool>(pool: &P, dataset: &str) -> bool {
  match pool.is_mounted(dataset).await {
    Ok(mounted) => mounted,
    Err(err) => {
      warn!(dataset, error = %err, "failed to check dataset mount state");
      false
    }
  }
}

/// Make sure every dataset of `config` is mounted, importing the pool if any
/// is not.
pub async fn reconcile_pool<P: StoragePool>(
  pool: &P,
  config: &PoolConfig,
  policy: &RetryPolicy,
) -> Result<PoolReport, PoolError> {
  let mut all_mounted = true;
  for dataset in &config.datasets {
    if !mounted(pool, dataset).await {
      info!(dataset = %dataset, "dataset not mounted");
      all_mounted = false;
    }
  }

  if all_mounted {
    info!(pool = %config.name, "all datasets already mounted");
    return Ok(PoolReport {
      imported: false,
      mounted: config.datasets.clone(),
      unmounted: Vec::new(),
    });
  }

  info!(pool = %config.name, "importing pool");
  retry(policy, "import pool", || pool.import(&config.name))
    .await
    .map_err(|source| PoolError::Import {
      pool: config.name.clone(),
      source,
    })?;
  info!(pool = %config.name, "pool imported");

  let mut report = PoolReport {
    imported: true,
    ..PoolReport::default()
  };
  for dataset in &config.datasets {
    if mounted(pool, dataset).await {
      info!(dataset = %dataset, "dataset mounted after import");
      report.mounted.push(dataset.clone());
    } else {
      warn!(dataset = %dataset, "dataset still not mounted after import");
      report.unmounted.push(dataset.clone());
    }
  }

  Ok(report)
}
