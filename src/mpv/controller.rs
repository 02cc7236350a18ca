//! High-level MPV controller with command methods and cached playback state.

use std::path::Path;
use std::time::Duration;

use async_channel::Receiver;
use serde::Serialize;
use thiserror::Error;

use super::ipc::{IpcError, MpvIpc};
use super::process::ProcessError;
use super::protocol::{metadata_title, MpvCommand, MpvEvent, MpvResponse};
use super::session::MpvSession;

/// Deadline for synchronous requests.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub const VOLUME_MIN: i64 = 0;
pub const VOLUME_MAX: i64 = 150;

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(IpcError),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
  #[error("mpv is not connected")]
  NotConnected,
  #[error("no response from mpv")]
  Timeout,
}

impl From<IpcError> for MpvError {
  fn from(e: IpcError) -> Self {
    match e {
      IpcError::Timeout(_) => MpvError::Timeout,
      IpcError::Disconnected | IpcError::ConnectionFailed(_) => MpvError::NotConnected,
      other => MpvError::Ipc(other),
    }
  }
}

/// Last known playback state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
  pub playing: bool,
  pub paused: bool,
  pub volume: i64,
  pub media_title: String,
}

impl Default for PlaybackState {
  fn default() -> Self {
    Self {
      playing: false,
      paused: false,
      volume: 100,
      media_title: String::new(),
    }
  }
}

/// What an MPV event changed, for whoever publishes state.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerNotice {
  Metadata(String),
  Pause(bool),
  Volume(i64),
  EndFile,
}

pub fn clamp_volume(volume: i64) -> i64 {
  volume.clamp(VOLUME_MIN, VOLUME_MAX)
}

/// Controls one MPV instance.
///
/// Fire-and-forget commands (`play`, `stop`, `set_volume`) succeed once the
/// request is written. Synchronous ones (`toggle_pause`, `toggle_mute`,
/// `get_volume`, `get_metadata_title`) wait up to the reply timeout for the
/// matching reply; events that arrive meanwhile stay queued on `events()`.
pub struct MpvController {
  session: MpvSession,
  state: PlaybackState,
  reply_timeout: Duration,
}

impl Default for MpvController {
  fn default() -> Self {
    Self::new()
  }
}

impl MpvController {
  pub fn new() -> Self {
    Self {
      session: MpvSession::new(),
      state: PlaybackState::default(),
      reply_timeout: REPLY_TIMEOUT,
    }
  }

  /// Override the deadline for synchronous requests.
  pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
    self.reply_timeout = timeout;
    self
  }

  /// Start MPV and connect to IPC.
  pub async fn start(
    &mut self,
    mpv_path: Option<&Path>,
    socket_path: &Path,
    extra_args: &[String],
  ) -> Result<(), MpvError> {
    self.state = PlaybackState::default();
    self.session.start(mpv_path, socket_path, extra_args).await?;
    log::info!("MPV controller connected");
    Ok(())
  }

  /// Stop MPV and reset cached state.
  pub async fn shutdown(&mut self) {
    self.session.shutdown().await;
    self.state = PlaybackState::default();
    log::info!("MPV controller stopped");
  }

  /// The IPC socket went away underneath us.
  pub fn connection_lost(&mut self) {
    log::warn!("Lost connection to mpv; playback state reset");
    self.session.disconnect();
    self.state.playing = false;
    self.state.paused = false;
  }

  pub fn is_alive(&mut self) -> bool {
    self.session.is_alive()
  }

  #[cfg(test)]
  pub(crate) async fn attach(&mut self, ipc: MpvIpc) {
    self.session.attach(ipc).await;
  }

  fn ipc(&self) -> Result<&MpvIpc, MpvError> {
    self.session.ipc().ok_or(MpvError::NotConnected)
  }

  async fn send_detached(&self, cmd: MpvCommand) -> Result<(), MpvError> {
    self.ipc()?.send_detached(cmd).await?;
    Ok(())
  }

  async fn send(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    let response = self.ipc()?.send_command(cmd, self.reply_timeout).await?;

    if !response.is_success() {
      return Err(MpvError::CommandFailed(response.error));
    }

    Ok(response)
  }

  /// Replace current playback with `url`.
  pub async fn play(&mut self, url: &str) -> Result<(), MpvError> {
    log::info!("play: {}", url);
    self.send_detached(MpvCommand::loadfile(url)).await?;
    self.state.playing = true;
    self.state.paused = false;
    Ok(())
  }

  /// Stop playback; MPV stays idle.
  pub async fn stop(&mut self) -> Result<(), MpvError> {
    log::info!("stop");
    self.send_detached(MpvCommand::stop()).await?;
    self.state.playing = false;
    self.state.paused = false;
    Ok(())
  }

  /// Set volume, clamped to 0-150. Returns the value sent.
  pub async fn set_volume(&mut self, volume: i64) -> Result<i64, MpvError> {
    let volume = clamp_volume(volume);
    log::info!("set volume: {}", volume);
    self.send_detached(MpvCommand::set_volume(volume)).await?;
    self.state.volume = volume;
    Ok(volume)
  }

  /// Toggle pause. Returns the new pause state.
  pub async fn toggle_pause(&mut self) -> Result<bool, MpvError> {
    if let Err(e) = self.send(MpvCommand::cycle("pause")).await {
      log::warn!("toggle_pause: {}", e);
      return Err(e);
    }
    self.state.paused = !self.state.paused;
    log::info!(
      "pause toggled -> {}",
      if self.state.paused { "paused" } else { "playing" }
    );
    Ok(self.state.paused)
  }

  /// Toggle mute.
  pub async fn toggle_mute(&mut self) -> Result<(), MpvError> {
    self.send(MpvCommand::cycle("mute")).await?;
    Ok(())
  }

  /// Ask MPV for the current volume.
  pub async fn get_volume(&mut self) -> Result<i64, MpvError> {
    let response = self.send(MpvCommand::get_property("volume")).await?;
    let volume = response
      .data
      .as_ref()
      .and_then(|d| d.as_f64())
      .ok_or_else(|| MpvError::CommandFailed("volume is not a number".to_string()))?;
    self.state.volume = clamp_volume(volume.round() as i64);
    Ok(self.state.volume)
  }

  /// Ask MPV for `media-title`. For streams this can be the station name,
  /// while metadata events carry `icy-title`, the current song.
  pub async fn get_metadata_title(&mut self) -> Result<String, MpvError> {
    let response = self.send(MpvCommand::get_property("media-title")).await?;
    let title = response
      .data
      .as_ref()
      .and_then(|d| d.as_str())
      .unwrap_or_default()
      .to_string();
    self.state.media_title = title.clone();
    Ok(title)
  }

  pub fn is_playing(&self) -> bool {
    self.state.playing
  }

  pub fn is_paused(&self) -> bool {
    self.state.paused
  }

  pub fn state(&self) -> &PlaybackState {
    &self.state
  }

  /// Event receiver for property changes and other events.
  pub fn events(&self) -> Option<Receiver<MpvEvent>> {
    self.session.events()
  }

  /// Fold an MPV event into the cached state.
  pub fn apply_event(&mut self, event: &MpvEvent) -> Option<PlayerNotice> {
    if let Some((name, data)) = event.as_property_change() {
      return match name {
        "metadata" => {
          let title = metadata_title(data);
          self.state.media_title = title.clone();
          Some(PlayerNotice::Metadata(title))
        }
        "pause" => {
          let paused = data.as_bool()?;
          self.state.paused = paused;
          Some(PlayerNotice::Pause(paused))
        }
        "volume" => {
          let volume = clamp_volume(data.as_f64()?.round() as i64);
          self.state.volume = volume;
          Some(PlayerNotice::Volume(volume))
        }
        _ => None,
      };
    }

    match event.event.as_str() {
      // A replaced stream ends with end-file before its successor starts.
      "start-file" => {
        self.state.playing = true;
        None
      }
      "end-file" => {
        log::info!(
          "end-file (reason: {})",
          event.reason.as_deref().unwrap_or("unknown")
        );
        self.state.playing = false;
        Some(PlayerNotice::EndFile)
      }
      _ => None,
    }
  }
}
