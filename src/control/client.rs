use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{ControlRequest, ControlResponse};

/// How long the CLI waits for the daemon's answer.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ControlError {
  #[error("daemon is not running (socket missing: {})", .socket.display())]
  DaemonNotRunning { socket: PathBuf },

  #[error("I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("daemon protocol error: {0}")]
  Protocol(String),

  #[error("no response from daemon within {0:?}")]
  Timeout(Duration),
}

fn io_err(path: &Path, source: std::io::Error) -> ControlError {
  ControlError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Send one request to the daemon socket and return its response.
pub async fn send_request(
  socket: &Path,
  request: &ControlRequest,
) -> Result<ControlResponse, ControlError> {
  send_request_timeout(socket, request, CLIENT_TIMEOUT).await
}

pub async fn send_request_timeout(
  socket: &Path,
  request: &ControlRequest,
  timeout: Duration,
) -> Result<ControlResponse, ControlError> {
  tokio::time::timeout(timeout, exchange(socket, request))
    .await
    .map_err(|_| ControlError::Timeout(timeout))?
}

async fn exchange(socket: &Path, request: &ControlRequest) -> Result<ControlResponse, ControlError> {
  let mut stream = UnixStream::connect(socket).await.map_err(|err| {
    if matches!(
      err.kind(),
      std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
    ) {
      ControlError::DaemonNotRunning {
        socket: socket.to_path_buf(),
      }
    } else {
      io_err(socket, err)
    }
  })?;

  let mut payload = serde_json::to_vec(request)?;
  payload.push(b'\n');
  stream
    .write_all(&payload)
    .await
    .map_err(|e| io_err(socket, e))?;
  stream.flush().await.map_err(|e| io_err(socket, e))?;

  let mut reader = BufReader::new(stream);
  let mut line = String::new();
  let read = reader
    .read_line(&mut line)
    .await
    .map_err(|e| io_err(socket, e))?;
  if read == 0 {
    return Err(ControlError::Protocol(
      "daemon closed connection before responding".to_string(),
    ));
  }

  Ok(serde_json::from_str(line.trim_end())?)
}
