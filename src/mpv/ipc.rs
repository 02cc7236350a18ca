//! Connection to a running player's IPC socket.
//!
//! One reader task owns the read half of the socket. Every line it reads is
//! either a reply, handed to the pending request with the same `request_id`,
//! or an event, pushed onto the event channel. Nothing else reads the socket,
//! so events that arrive while a synchronous request is waiting are never
//! lost.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Encoding failed: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("No response within {0:?}")]
  Timeout(Duration),
  #[error("Disconnected")]
  Disconnected,
}

/// Slot the reader fills with the matching reply.
type PendingRequest = oneshot::Sender<MpvResponse>;

/// IPC connection state shared between the reader task and callers.
struct IpcState {
  pending: HashMap<i64, PendingRequest>,
}

/// Work for the writer task.
enum WriteMessage {
  Command {
    line: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
  },
  Close,
}

/// One live connection. Dropping it stops both tasks.
pub struct MpvIpc {
  state: Arc<Mutex<IpcState>>,
  next_id: AtomicI64,
  connected: Arc<AtomicBool>,
  write_tx: Sender<WriteMessage>,
  event_rx: Receiver<MpvEvent>,
  cancel: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect to the MPV IPC socket. A single attempt; the session layer
  /// decides how often to retry.
  pub async fn connect(path: &Path) -> Result<Self, IpcError> {
    let stream = tokio::net::UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(format!("{}: {}", path.display(), e)))?;

    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::setup(reader, writer))
  }

  pub(crate) fn setup<R, W>(reader: R, writer: W) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let state = Arc::new(Mutex::new(IpcState {
      pending: HashMap::new(),
    }));
    let connected = Arc::new(AtomicBool::new(true));
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) = async_channel::unbounded();
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let reader_handle = tokio::spawn(Self::reader_loop(
      reader,
      state.clone(),
      connected.clone(),
      event_tx,
      cancel.clone(),
    ));

    let writer_handle = tokio::spawn(Self::writer_loop(writer, write_rx));

    Self {
      state,
      next_id: AtomicI64::new(1),
      connected,
      write_tx,
      event_rx,
      cancel,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<IpcState>>,
    connected: Arc<AtomicBool>,
    event_tx: Sender<MpvEvent>,
    cancel: CancellationToken,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      let read = tokio::select! {
        _ = cancel.cancelled() => break,
        read = buf_reader.read_line(&mut line) => read,
      };

      match read {
        Ok(0) => {
          log::info!("MPV IPC connection closed");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }

          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              let slot = state.lock().pending.remove(&response.request_id);
              match slot {
                Some(tx) => {
                  let _ = tx.send(response);
                }
                None => log::debug!(
                  "MPV reply without waiter (request_id={}, error={})",
                  response.request_id,
                  response.error
                ),
              }
            }
            Ok(MpvMessage::Event(event)) => {
              log::debug!("MPV event: {:?}", event);
              if event_tx.send(event).await.is_err() {
                log::debug!("MPV event receiver dropped");
              }
            }
            Err(e) => {
              log::warn!("Failed to parse MPV message: {} - {}", e, trimmed);
            }
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a disconnect.
    state.lock().pending.clear();
    event_tx.close();
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<WriteMessage>,
  ) {
    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Command { line, done } => {
          let result = match writer.write_all(&line).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
          };
          let failed = result.is_err();
          let _ = done.send(result);
          if failed {
            break;
          }
        }
        WriteMessage::Close => {
          log::debug!("MPV IPC writer closing");
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }

  async fn write(&self, cmd: &MpvCommand) -> Result<(), IpcError> {
    if !self.is_connected() {
      return Err(IpcError::Disconnected);
    }

    let mut line = serde_json::to_vec(cmd)?;
    line.push(b'\n');

    let (done, written) = oneshot::channel();
    self
      .write_tx
      .send(WriteMessage::Command { line, done })
      .await
      .map_err(|_| IpcError::Disconnected)?;

    written.await.map_err(|_| IpcError::Disconnected)??;
    Ok(())
  }

  /// Write a command without waiting for its reply.
  pub async fn send_detached(&self, cmd: MpvCommand) -> Result<(), IpcError> {
    log::debug!("Sending MPV command: {}", cmd.name());
    self.write(&cmd).await
  }

  /// Send a command to MPV and wait up to `timeout` for the matching reply.
  pub async fn send_command(
    &self,
    cmd: MpvCommand,
    timeout: Duration,
  ) -> Result<MpvResponse, IpcError> {
    let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let cmd = cmd.with_request_id(request_id);

    let (tx, rx) = oneshot::channel();
    self.state.lock().pending.insert(request_id, tx);

    log::debug!("Sending MPV command: {} (request_id={})", cmd.name(), request_id);
    if let Err(e) = self.write(&cmd).await {
      self.state.lock().pending.remove(&request_id);
      return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(response)) => Ok(response),
      Ok(Err(_)) => Err(IpcError::Disconnected),
      Err(_) => {
        log::warn!(
          "MPV command {} timed out after {:?}, request_id={}",
          cmd.name(),
          timeout,
          request_id
        );
        self.state.lock().pending.remove(&request_id);
        Err(IpcError::Timeout(timeout))
      }
    }
  }

  /// Whether the reader still sees an open socket.
  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  /// Number of requests still waiting for a reply.
  pub fn pending_count(&self) -> usize {
    self.state.lock().pending.len()
  }

  /// Get the event receiver. Closed once the socket goes away.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  /// Close the connection.
  pub fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
    self.cancel.cancel();
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.cancel.cancel();
    self.write_tx.close();
  }
}
