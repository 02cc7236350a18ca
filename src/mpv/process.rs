//! MPV process detection and spawning.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

/// How long a terminated player gets before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);
/// Upper bound for reading leftover stderr of a dead player.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found (is mpv installed?)")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("MPV exited prematurely with {0}")]
  Exited(ExitStatus),
  #[error("Timed out waiting for MPV IPC socket {}", .0.display())]
  SocketTimeout(PathBuf),
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = ["/usr/local/bin/mpv", "/opt/homebrew/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Fixed arguments every player instance gets, followed by `extra_args`.
pub fn mpv_args(socket_path: &Path, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![
    "--idle".to_string(),
    "--no-video".to_string(),
    "--no-terminal".to_string(),
    "--volume-max=150".to_string(),
    format!("--input-ipc-server={}", socket_path.display()),
  ];
  args.extend(extra_args.iter().cloned());
  args
}

/// Map an early exit to an error. Exit code 127 is what a shell or wrapper
/// reports when the executable is missing.
pub fn classify_exit(status: ExitStatus) -> ProcessError {
  if status.code() == Some(127) {
    ProcessError::NotFound
  } else {
    ProcessError::Exited(status)
  }
}

/// Remove a stale IPC socket file.
pub fn cleanup_socket(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => log::debug!("Removed stale socket {}", path.display()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => log::warn!("Failed to remove socket {}: {}", path.display(), e),
  }
}

/// A running player subprocess with its stderr piped to us.
pub struct PlayerProcess {
  child: Child,
  stderr: Option<ChildStderr>,
}

impl PlayerProcess {
  /// Spawn MPV with IPC server enabled.
  pub fn spawn_mpv(
    mpv_path: Option<&Path>,
    socket_path: &Path,
    extra_args: &[String],
  ) -> Result<Self, ProcessError> {
    let mpv_exe = mpv_path
      .map(Path::to_path_buf)
      .or_else(find_mpv)
      .ok_or(ProcessError::NotFound)?;

    log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, socket_path.display());
    if !extra_args.is_empty() {
      log::info!("Extra MPV args: {:?}", extra_args);
    }

    Self::spawn(&mpv_exe, &mpv_args(socket_path, extra_args))
  }

  /// Spawn `program` with `args`, stdin/stdout closed and stderr piped.
  pub fn spawn(program: &Path, args: &[String]) -> Result<Self, ProcessError> {
    let mut cmd = Command::new(program);
    cmd
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped());

    // The child starts with whatever mask the spawning thread had; clear it so
    // SIGTERM/SIGINT reach the player normally.
    unsafe {
      cmd.pre_exec(|| {
        signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
          .map_err(std::io::Error::from)
      });
    }

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => ProcessError::NotFound,
      _ => ProcessError::SpawnFailed(e),
    })?;
    let stderr = child.stderr.take();

    Ok(Self { child, stderr })
  }

  pub fn id(&self) -> Option<u32> {
    self.child.id()
  }

  /// Non-blocking check whether the process has exited.
  pub fn try_exit(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
    Ok(self.child.try_wait()?)
  }

  pub fn is_alive(&mut self) -> bool {
    matches!(self.child.try_wait(), Ok(None))
  }

  /// Read whatever the process left on stderr, trimmed of trailing newlines.
  pub async fn drain_stderr(&mut self) -> String {
    let Some(mut stderr) = self.stderr.take() else {
      return String::new();
    };

    let mut output = String::new();
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr.read_to_string(&mut output)).await {
      Ok(Ok(_)) => {}
      Ok(Err(e)) => log::debug!("Reading MPV stderr failed: {}", e),
      Err(_) => log::debug!("MPV stderr still open after {:?}", STDERR_DRAIN_TIMEOUT),
    }
    output.trim_end_matches(['\n', '\r']).to_string()
  }

  /// Hand stderr to a background task that logs each line.
  pub fn forward_stderr(&mut self) {
    let Some(stderr) = self.stderr.take() else {
      return;
    };

    tokio::spawn(async move {
      let mut lines = BufReader::new(stderr).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        log::debug!(target: "mpv", "{}", line);
      }
    });
  }

  /// Wait up to `timeout` for the process to exit on its own.
  pub async fn wait_exit_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(timeout, self.child.wait()).await {
      Ok(Ok(status)) => Some(status),
      Ok(Err(e)) => {
        log::error!("wait() failed: {}", e);
        None
      }
      Err(_) => None,
    }
  }

  /// Send SIGTERM and reap the process, escalating to SIGKILL if it does not
  /// exit within the grace period.
  pub async fn terminate(&mut self) -> Option<ExitStatus> {
    if let Ok(Some(status)) = self.child.try_wait() {
      return Some(status);
    }

    if let Some(pid) = self.child.id() {
      log::info!("Terminating MPV process (pid: {})", pid);
      if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        log::warn!("SIGTERM to pid {} failed: {}", pid, e);
      }
    }

    if let Some(status) = self.wait_exit_timeout(TERMINATE_GRACE).await {
      log::info!("MPV process exited with: {}", status);
      return Some(status);
    }

    log::warn!("MPV ignored SIGTERM for {:?}, killing", TERMINATE_GRACE);
    if let Err(e) = self.child.kill().await {
      log::error!("kill() failed: {}", e);
      return None;
    }
    self.child.try_wait().ok().flatten()
  }
}

/// Describe an exit status for logs.
pub fn describe_exit(status: ExitStatus) -> String {
  match (status.code(), status.signal()) {
    (Some(code), _) => format!("status {}", code),
    (None, Some(sig)) => format!("signal {}", sig),
    _ => status.to_string(),
  }
}
