//! Local control socket. Each connection carries exactly one request line
//! and one response line.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Take};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;

use super::protocol::{ControlRequest, ControlResponse};
use crate::error::{io_err, DaemonError};

/// How long a client gets to deliver its request line.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest request line accepted.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

#[derive(Error, Debug)]
pub enum RequestError {
  #[error("client sent no request within {0:?}")]
  Timeout(Duration),
  #[error("client closed the connection before a full request")]
  Closed,
  #[error("read failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid request JSON: {0}")]
  Malformed(String),
}

pub struct ControlServer {
  listener: UnixListener,
  path: PathBuf,
  read_timeout: Duration,
}

impl ControlServer {
  /// Bind the control socket at `path`, owner-only.
  pub fn bind(path: &Path) -> Result<Self, DaemonError> {
    prepare_socket_for_bind(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let listener = UnixListener::bind(path).map_err(|e| io_err(path, e))?;
    set_socket_permissions(path)?;
    log::info!("control socket listening on {}", path.display());

    Ok(Self {
      listener,
      path: path.to_path_buf(),
      read_timeout: READ_TIMEOUT,
    })
  }

  pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
    self.read_timeout = timeout;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Wait for the next client.
  pub async fn accept(&self) -> std::io::Result<Connection> {
    let (stream, _) = self.listener.accept().await?;
    let (reader, writer) = stream.into_split();
    Ok(Connection {
      reader: BufReader::new(reader.take(MAX_REQUEST_BYTES)),
      writer,
      read_timeout: self.read_timeout,
    })
  }

  /// Stop listening and remove the socket file.
  pub fn close(self) {
    drop(self);
  }
}

impl Drop for ControlServer {
  fn drop(&mut self) {
    match fs::remove_file(&self.path) {
      Ok(()) => log::debug!("removed control socket {}", self.path.display()),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => log::warn!("cannot remove {}: {}", self.path.display(), e),
    }
  }
}

/// One accepted client.
pub struct Connection {
  reader: BufReader<Take<OwnedReadHalf>>,
  writer: OwnedWriteHalf,
  read_timeout: Duration,
}

impl Connection {
  /// Read the request line. A line that is not valid JSON yields
  /// `Malformed`; the caller still owes the client a response then.
  pub async fn read_request(&mut self) -> Result<ControlRequest, RequestError> {
    let mut line = Vec::new();
    let read = tokio::time::timeout(self.read_timeout, self.reader.read_until(b'\n', &mut line))
      .await
      .map_err(|_| RequestError::Timeout(self.read_timeout))??;

    if read == 0 || line.last() != Some(&b'\n') {
      return Err(RequestError::Closed);
    }

    log::debug!("control request: {}", String::from_utf8_lossy(&line).trim_end());
    serde_json::from_slice(&line).map_err(|e| RequestError::Malformed(e.to_string()))
  }

  pub async fn respond(mut self, response: &ControlResponse) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    self.writer.write_all(&payload).await?;
    self.writer.flush().await?;
    self.writer.shutdown().await
  }
}

/// Remove a stale socket left by a dead daemon; refuse one that still
/// accepts connections.
fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
  if !socket.exists() {
    return Ok(());
  }

  match StdUnixStream::connect(socket) {
    Ok(_) => return Err(DaemonError::AlreadyRunning(socket.to_path_buf())),
    Err(err) => log::warn!(
      "removing stale control socket {} ({})",
      socket.display(),
      err
    ),
  }

  match fs::remove_file(socket) {
    Ok(()) => Ok(()),
    Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
    Err(err) => Err(io_err(socket, err)),
  }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::control::client::send_request;
  use serde_json::json;
  use tokio::io::AsyncWriteExt;
  use tokio::net::UnixStream;

  fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("control.sock")
  }

  #[tokio::test]
  async fn test_socket_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::bind(&socket_in(&dir)).unwrap();
    let mode = fs::metadata(server.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
  }

  #[tokio::test]
  async fn test_request_and_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let server = ControlServer::bind(&path).unwrap();

    let serve = async {
      let mut conn = server.accept().await.unwrap();
      let request = conn.read_request().await.unwrap();
      assert_eq!(request.command, "volume");
      assert_eq!(request.arg("value"), Some(&json!("up")));
      conn.respond(&ControlResponse::ok_with(json!(105))).await.unwrap();
    };
    let request = ControlRequest::new("volume").with_arg("value", "up");
    let (_, response) = tokio::join!(serve, send_request(&path, &request));

    assert_eq!(response.unwrap(), ControlResponse::ok_with(json!(105)));
  }

  #[tokio::test]
  async fn test_malformed_json_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let server = ControlServer::bind(&path).unwrap();

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(b"{not json\n").await.unwrap();

    let mut conn = server.accept().await.unwrap();
    assert!(matches!(
      conn.read_request().await,
      Err(RequestError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn test_invalid_utf8_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let server = ControlServer::bind(&path).unwrap();

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(b"{\"command\":\"st\xffop\"}\n").await.unwrap();

    let mut conn = server.accept().await.unwrap();
    assert!(matches!(
      conn.read_request().await,
      Err(RequestError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn test_silent_client_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let server = ControlServer::bind(&path)
      .unwrap()
      .with_read_timeout(Duration::from_millis(50));

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(br#"{"command":"status"}"#).await.unwrap();

    let mut conn = server.accept().await.unwrap();
    assert!(matches!(
      conn.read_request().await,
      Err(RequestError::Timeout(_))
    ));
  }

  #[tokio::test]
  async fn test_request_without_newline_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let server = ControlServer::bind(&path).unwrap();

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(br#"{"command":"status"}"#).await.unwrap();
    client.shutdown().await.unwrap();

    let mut conn = server.accept().await.unwrap();
    assert!(matches!(conn.read_request().await, Err(RequestError::Closed)));
  }

  #[tokio::test]
  async fn test_stale_socket_replaced_live_socket_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);

    // A socket file nobody listens on.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());
    let server = ControlServer::bind(&path).unwrap();

    assert!(matches!(
      ControlServer::bind(&path),
      Err(DaemonError::AlreadyRunning(_))
    ));

    server.close();
    assert!(!path.exists());
  }
}
