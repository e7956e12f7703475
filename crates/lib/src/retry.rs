//! Bounded retries with a fixed delay.
//!
//! [`retry`] treats every error as transient. The caller decides what to wrap:
//! reconcilers wrap their whole read-check-act procedure, not single calls.

use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: NonZeroU32,
  /// Delay between a failed attempt and the next one.
  #[serde(rename = "delay_secs", with = "secs")]
  pub delay: Duration,
}

impl RetryPolicy {
  pub fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
    Self { max_attempts, delay }
  }

  /// A policy that tries exactly once.
  pub fn once() -> Self {
    Self::new(NonZeroU32::MIN, Duration::ZERO)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
      delay: Duration::from_secs(5),
    }
  }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// The error of the final attempt is returned unchanged. No delay follows
/// the final failure.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  retry_while(policy, label, |_| true, op).await
}

/// Like [`retry`], but an error for which `transient` returns false is
/// returned at once without further attempts.
pub async fn retry_while<T, E, F, Fut, P>(policy: &RetryPolicy, label: &str, transient: P, mut op: F) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
  P: Fn(&E) -> bool,
{
  let max = policy.max_attempts.get();
  let mut attempt = 1;
  loop {
    debug!(op = label, attempt, max_attempts = max, "attempt started");
    match op().await {
      Ok(value) => return Ok(value),
      Err(err) => {
        warn!(op = label, attempt, max_attempts = max, error = %err, "attempt failed");
        if attempt >= max || !transient(&err) {
          return Err(err);
        }
        attempt += 1;
        tokio::time::sleep(policy.delay).await;
      }
    }
  }
}

pub(crate) mod secs {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
  }
}
