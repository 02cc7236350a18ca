use std::path::PathBuf;

use thiserror::Error;

use crate::mpv::MpvError;

/// Errors that stop the daemon from starting or keep it from running.
#[derive(Debug, Error)]
pub enum DaemonError {
  #[error("I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to start mpv: {0}")]
  Player(#[from] MpvError),

  #[error("control socket already in use: {}", .0.display())]
  AlreadyRunning(PathBuf),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
  DaemonError::Io {
    path: path.into(),
    source,
  }
}
