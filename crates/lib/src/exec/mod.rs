//! Local command execution.
//!
//! Every shell-level effect (package install, pool import, mount checks,
//! service management, shutdown) goes through a [`CommandRunner`], so the
//! reconcilers can be exercised against a scripted runner in tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while running a local command.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The program could not be started at all.
  #[error("failed to spawn '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  /// The program ran and exited unsuccessfully.
  #[error("command '{cmd}' failed with exit code {code:?}: {stderr}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// A program invocation: argv plus an optional working directory.
///
/// Arguments are passed verbatim, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// Runs local commands synchronously from the caller's point of view.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
  /// Run the command to completion.
  ///
  /// Returns trimmed stdout on success. A nonzero exit is an
  /// [`ExecError::Failed`] carrying the captured stderr.
  async fn run(&self, spec: &CommandSpec) -> Result<String, ExecError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
  async fn run(&self, spec: &CommandSpec) -> Result<String, ExecError> {
    (**self).run(spec).await
  }
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
  async fn run(&self, spec: &CommandSpec) -> Result<String, ExecError> {
    let mut command = Command::new(&spec.program);
    command
      .args(&spec.args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
      command.current_dir(cwd);
    }

    debug!(cmd = %spec, cwd = ?spec.cwd, "spawning process");

    let output = command.output().await.map_err(|source| ExecError::Spawn {
      cmd: spec.to_string(),
      source,
    })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      return Err(ExecError::Failed {
        cmd: spec.to_string(),
        code: output.status.code(),
        stderr,
      });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command output");
    }

    Ok(stdout)
  }
}
