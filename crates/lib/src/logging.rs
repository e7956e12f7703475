//! Relocatable log file sink.
//!
//! At boot the log lives on an ephemeral path because the persistent volume
//! is not mounted yet. Once it is, [`LogService::relocate`] moves the log
//! there: the old file is flushed, copied to the new path, the new file takes
//! over, and only then is the old file removed. The whole switch happens
//! under the sink's lock, so no line is written to both files or lost.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;

/// Errors that can occur while opening or moving the log file.
#[derive(Debug, Error)]
pub enum LogError {
  /// The current log file vanished before it could be moved.
  #[error("log file does not exist: {0}")]
  Missing(PathBuf),

  #[error("failed to {action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// `<base>/logs/<YYMMDD_HHMMSS>-ec2-<instance-id>.log`
pub fn log_file_path(base: &Path, instance_id: &str, at: DateTime<Local>) -> PathBuf {
  base
    .join("logs")
    .join(format!("{}-ec2-{}.log", at.format("%y%m%d_%H%M%S"), instance_id))
}

#[derive(Debug)]
struct LogDestination {
  path: PathBuf,
  file: File,
}

/// Handle to the process-wide log file.
///
/// Clones share one destination. Until [`attach`](LogService::attach) is
/// called, writes are discarded.
#[derive(Debug, Clone, Default)]
pub struct LogService {
  inner: Arc<Mutex<Option<LogDestination>>>,
}

fn open_append(path: &Path) -> Result<File, LogError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|source| LogError::Io {
      action: "create",
      path: parent.to_path_buf(),
      source,
    })?;
  }
  OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(|source| LogError::Io {
      action: "open",
      path: path.to_path_buf(),
      source,
    })
}

impl LogService {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Option<LogDestination>> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Current log file, if attached.
  pub fn path(&self) -> Option<PathBuf> {
    self.lock().as_ref().map(|d| d.path.clone())
  }

  /// Start writing to `path`, creating parent directories as needed.
  pub fn attach(&self, path: &Path) -> Result<(), LogError> {
    let file = open_append(path)?;
    *self.lock() = Some(LogDestination {
      path: path.to_path_buf(),
      file,
    });
    Ok(())
  }

  /// Move the log to `new_path`.
  ///
  /// On error the service keeps writing to the current file. Once the new
  /// file has taken over, the move counts as done even if the old file
  /// cannot be removed.
  pub fn relocate(&self, new_path: &Path) -> Result<PathBuf, LogError> {
    let mut guard = self.lock();

    if guard.is_none() {
      // Nothing written yet, nothing to carry over.
      drop(guard);
      self.attach(new_path)?;
      return Ok(new_path.to_path_buf());
    }

    let old_path = guard.as_ref().map(|d| d.path.clone()).unwrap_or_default();
    if old_path == new_path {
      return Ok(old_path);
    }
    if let Some(current) = guard.as_mut() {
      current.file.flush().map_err(|source| LogError::Io {
        action: "flush",
        path: old_path.clone(),
        source,
      })?;
    }
    if !old_path.exists() {
      return Err(LogError::Missing(old_path));
    }

    if let Some(parent) = new_path.parent() {
      fs::create_dir_all(parent).map_err(|source| LogError::Io {
        action: "create",
        path: parent.to_path_buf(),
        source,
      })?;
    }
    fs::copy(&old_path, new_path).map_err(|source| LogError::Io {
      action: "copy",
      path: new_path.to_path_buf(),
      source,
    })?;
    let file = open_append(new_path)?;

    let previous = guard.replace(LogDestination {
      path: new_path.to_path_buf(),
      file,
    });
    drop(previous);
    // Release before logging: the tracing file layer writes through this lock.
    drop(guard);

    remove_previous(&old_path);
    Ok(new_path.to_path_buf())
  }
}

/// Remove the file the log moved away from. The new file is already live, so
/// a failure leaves a stale copy behind and is only reported.
fn remove_previous(path: &Path) -> bool {
  match fs::remove_file(path) {
    Ok(()) => true,
    Err(err) => {
      warn!(path = %path.display(), error = %err, "failed to remove previous log file");
      false
    }
  }
}

/// Writer handed to the tracing formatter for one event.
pub struct LogWriter<'a> {
  guard: MutexGuard<'a, Option<LogDestination>>,
}

impl Write for LogWriter<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    match self.guard.as_mut() {
      Some(dest) => dest.file.write(buf),
      None => Ok(buf.len()),
    }
  }

  fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
    match self.guard.as_mut() {
      Some(dest) => dest.file.write_all(buf),
      None => Ok(()),
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    match self.guard.as_mut() {
      Some(dest) => dest.file.flush(),
      None => Ok(()),
    }
  }
}

impl<'a> MakeWriter<'a> for LogService {
  type Writer = LogWriter<'a>;

  fn make_writer(&'a self) -> Self::Writer {
    LogWriter { guard: self.lock() }
  }
}
