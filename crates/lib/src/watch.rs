//! Spot termination watch loop.
//!
//! Polls the metadata service for an interruption notice and shuts the
//! machine down when termination is announced. The loop never returns;
//! it ends when the process is killed, typically by the shutdown it issued.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::exec::{CommandRunner, CommandSpec, ExecError};
use crate::metadata::{InstanceAction, MetadataError, MetadataSource};

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors from a single poll. Logged and swallowed by [`TerminationWatch::run`].
#[derive(Debug, Error)]
pub enum WatchError {
  #[error("error checking for termination notice: {0}")]
  Metadata(#[from] MetadataError),

  #[error("failed to issue shutdown: {0}")]
  Shutdown(#[from] ExecError),
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
  NoNotice,
  /// A notice that does not announce termination.
  Notice(InstanceAction),
  /// Termination was announced and shutdown was issued.
  ShuttingDown(InstanceAction),
}

pub struct TerminationWatch<M, R> {
  metadata: M,
  runner: R,
  interval: Duration,
}

impl<M: MetadataSource, R: CommandRunner> TerminationWatch<M, R> {
  pub fn new(metadata: M, runner: R, interval: Duration) -> Self {
    Self {
      metadata,
      runner,
      interval,
    }
  }

  /// Check once, with a fresh token, and shut down on a termination notice.
  pub async fn poll_once(&self) -> Result<WatchOutcome, WatchError> {
    let token = self.metadata.token().await?;
    let Some(action) = self.metadata.instance_action(&token).await? else {
      return Ok(WatchOutcome::NoNotice);
    };

    if !action.is_termination() {
      info!(action = ?action.action, time = ?action.time, "interruption notice does not announce termination");
      return Ok(WatchOutcome::Notice(action));
    }

    info!(time = ?action.time, "termination notice received, shutting down");
    self.runner.run(&shutdown_command()).await?;
    Ok(WatchOutcome::ShuttingDown(action))
  }

  /// Poll forever. Every error is logged and the loop carries on.
  pub async fn run(&self) {
    info!(interval = ?self.interval, "watching for termination notices");
    loop {
      match self.poll_once().await {
        Ok(_) => {}
        Err(WatchError::Metadata(err)) if err.is_network() => {
          warn!(error = %err, "error checking for termination notice");
        }
        Err(err) => {
          error!(error = ?err, "termination watch poll failed");
        }
      }
      tokio::time::sleep(self.interval).await;
    }
  }
}

fn shutdown_command() -> CommandSpec {
  CommandSpec::new("shutdown").args(["-h", "now"])
}
