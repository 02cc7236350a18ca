//! Lifecycle of the player subprocess and its IPC connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ipc::MpvIpc;
use super::process::{cleanup_socket, classify_exit, describe_exit, PlayerProcess, ProcessError};
use super::protocol::{MpvCommand, OBS_METADATA, OBS_PAUSE, OBS_VOLUME};

/// Interval between IPC connect attempts during startup.
const CONNECT_INTERVAL: Duration = Duration::from_millis(100);
/// Connect attempts before startup gives up (5 s at the interval above).
const CONNECT_ATTEMPTS: u32 = 50;
/// How long a player that was asked to quit gets before it is signalled.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// One player process plus its IPC connection.
///
/// Lifecycle: spawned -> connected -> active -> terminated. `start` tears
/// down any previous instance first, so at most one player is alive.
pub struct MpvSession {
  process: Option<PlayerProcess>,
  ipc: Option<MpvIpc>,
  socket_path: Option<PathBuf>,
  connect_interval: Duration,
  connect_attempts: u32,
}

impl Default for MpvSession {
  fn default() -> Self {
    Self {
      process: None,
      ipc: None,
      socket_path: None,
      connect_interval: CONNECT_INTERVAL,
      connect_attempts: CONNECT_ATTEMPTS,
    }
  }
}

impl MpvSession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Override how often and how long `start` polls for the IPC socket.
  pub fn with_connect_polling(mut self, interval: Duration, attempts: u32) -> Self {
    self.connect_interval = interval;
    self.connect_attempts = attempts.max(1);
    self
  }

  /// Spawn MPV, wait for its IPC socket and subscribe to property changes.
  pub async fn start(
    &mut self,
    mpv_path: Option<&Path>,
    socket_path: &Path,
    extra_args: &[String],
  ) -> Result<(), ProcessError> {
    self.shutdown().await;
    cleanup_socket(socket_path);

    let mut process = PlayerProcess::spawn_mpv(mpv_path, socket_path, extra_args)?;
    log::info!(
      "Started mpv pid={:?} socket={}",
      process.id(),
      socket_path.display()
    );

    for attempt in 1..=self.connect_attempts {
      tokio::time::sleep(self.connect_interval).await;

      if let Some(status) = process.try_exit()? {
        let stderr = process.drain_stderr().await;
        if !stderr.is_empty() {
          log::error!("mpv stderr: {}", stderr);
        }
        let err = classify_exit(status);
        match err {
          ProcessError::NotFound => log::error!("mpv not found - is it installed? (apt install mpv)"),
          _ => log::error!("mpv exited prematurely with {}", describe_exit(status)),
        }
        return Err(err);
      }

      match MpvIpc::connect(socket_path).await {
        Ok(ipc) => {
          log::info!("Connected to mpv IPC socket after {} attempt(s)", attempt);
          process.forward_stderr();
          subscribe(&ipc).await;
          self.process = Some(process);
          self.ipc = Some(ipc);
          self.socket_path = Some(socket_path.to_path_buf());
          return Ok(());
        }
        Err(e) => log::trace!("IPC connect attempt {} failed: {}", attempt, e),
      }
    }

    log::error!("Timeout connecting to mpv IPC socket {}", socket_path.display());
    process.terminate().await;
    let stderr = process.drain_stderr().await;
    if !stderr.is_empty() {
      log::error!("mpv stderr: {}", stderr);
    }
    cleanup_socket(socket_path);
    Err(ProcessError::SocketTimeout(socket_path.to_path_buf()))
  }

  /// Ask MPV to quit, close the socket and reap the process. Safe to call
  /// any number of times.
  pub async fn shutdown(&mut self) {
    if let Some(ipc) = self.ipc.take() {
      if ipc.is_connected() {
        if let Err(e) = ipc.send_detached(MpvCommand::quit()).await {
          log::debug!("quit request not delivered: {}", e);
        }
      }
      ipc.close();
    }

    if let Some(mut process) = self.process.take() {
      match process.wait_exit_timeout(QUIT_GRACE).await {
        Some(status) => log::info!("mpv exited with {}", describe_exit(status)),
        None => {
          process.terminate().await;
        }
      }
    }

    if let Some(path) = self.socket_path.take() {
      cleanup_socket(&path);
    }
  }

  /// Drop a connection whose socket has closed. The process, if any, is kept
  /// for `shutdown` to reap.
  pub fn disconnect(&mut self) {
    if let Some(ipc) = self.ipc.take() {
      ipc.close();
    }
  }

  /// Connection to the player, if one is up.
  pub fn ipc(&self) -> Option<&MpvIpc> {
    self.ipc.as_ref().filter(|ipc| ipc.is_connected())
  }

  /// Whether the player can currently be talked to.
  pub fn is_alive(&mut self) -> bool {
    let process_alive = self.process.as_mut().map_or(true, PlayerProcess::is_alive);
    process_alive && self.ipc().is_some()
  }

  /// Use an existing connection without a managed process.
  #[cfg(test)]
  pub(crate) async fn attach(&mut self, ipc: MpvIpc) {
    subscribe(&ipc).await;
    self.ipc = Some(ipc);
  }

  /// Event receiver of the live connection.
  pub fn events(&self) -> Option<async_channel::Receiver<super::MpvEvent>> {
    self.ipc.as_ref().map(MpvIpc::events)
  }
}

async fn subscribe(ipc: &MpvIpc) {
  for (id, name) in [
    (OBS_METADATA, "metadata"),
    (OBS_PAUSE, "pause"),
    (OBS_VOLUME, "volume"),
  ] {
    if let Err(e) = ipc.send_detached(MpvCommand::observe_property(id, name)).await {
      log::warn!("Failed to observe {}: {}", name, e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::testing::FakeMpv;
  use serde_json::json;

  #[tokio::test]
  async fn test_attach_subscribes_to_properties() {
    let (ipc, mpv) = FakeMpv::spawn();
    let mut session = MpvSession::new();
    session.attach(ipc).await;

    // Round-trip a synchronous request so the observe commands have landed.
    session
      .ipc()
      .unwrap()
      .send_command(MpvCommand::get_property("pause"), Duration::from_secs(2))
      .await
      .unwrap();

    let observed: Vec<_> = mpv
      .commands()
      .into_iter()
      .filter(|c| c[0] == json!("observe_property"))
      .map(|c| c[2].clone())
      .collect();
    assert_eq!(observed, vec![json!("metadata"), json!("pause"), json!("volume")]);
  }

  #[tokio::test]
  async fn test_shutdown_sends_quit_and_is_idempotent() {
    let (ipc, mpv) = FakeMpv::spawn();
    let mut session = MpvSession::new();
    session.attach(ipc).await;
    assert!(session.is_alive());

    session.shutdown().await;
    session.shutdown().await;

    assert!(!session.is_alive());
    assert!(session.events().is_none());

    let mut quit_seen = false;
    for _ in 0..50 {
      if mpv.commands().iter().any(|c| c[0] == json!("quit")) {
        quit_seen = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(quit_seen);
  }

  #[tokio::test]
  async fn test_start_fails_fast_when_player_exits() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("mpv.sock");
    let mut session = MpvSession::new();

    let started = std::time::Instant::now();
    let err = session
      .start(Some(Path::new("/bin/false")), &socket, &[])
      .await
      .unwrap_err();

    assert!(matches!(err, ProcessError::Exited(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!session.is_alive());
  }

  #[tokio::test]
  async fn test_start_times_out_and_reaps_silent_player() {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("mpv.sock");
    let pid_file = dir.path().join("player.pid");
    let script = dir.path().join("silent-mpv");
    std::fs::write(
      &script,
      format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut session = MpvSession::new().with_connect_polling(Duration::from_millis(50), 10);
    let started = std::time::Instant::now();
    let mut result = session.start(Some(&script), &socket, &[]).await;
    // A freshly written script can briefly be busy if another test forked
    // while it was open for writing.
    for _ in 0..5 {
      match &result {
        Err(ProcessError::SpawnFailed(e)) if e.raw_os_error() == Some(Errno::ETXTBSY as i32) => {
          tokio::time::sleep(Duration::from_millis(20)).await;
          result = session.start(Some(&script), &socket, &[]).await;
        }
        _ => break,
      }
    }

    assert!(matches!(result, Err(ProcessError::SocketTimeout(ref p)) if p == &socket));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!session.is_alive());
    assert!(!socket.exists());

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
  }

  #[tokio::test]
  async fn test_start_reports_missing_binary() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("mpv.sock");
    let mut session = MpvSession::new();

    let err = session
      .start(Some(Path::new("/nonexistent/mpv")), &socket, &[])
      .await
      .unwrap_err();
    assert!(matches!(err, ProcessError::NotFound));
  }
}
