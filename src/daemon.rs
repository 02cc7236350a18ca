//! The daemon: one task owning all state, driven by a single select loop
//! over signals, control connections and player events.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::command;
use crate::config::Config;
use crate::control::{Connection, ControlResponse, ControlServer, RequestError};
use crate::error::{io_err, DaemonError};
use crate::logging;
use crate::mpv::{MpvController, MpvError, MpvEvent, PlayerNotice};
use crate::publish::{LogPublisher, StatePublisher};
use crate::stations::StationList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
  Reload,
  Terminate,
}

/// Everything the daemon owns. Only the reactor task touches it.
pub struct Radio {
  pub(crate) config: Config,
  config_path: PathBuf,
  pub(crate) stations: StationList,
  pub(crate) player: MpvController,
  publisher: Box<dyn StatePublisher>,
}

impl Radio {
  pub fn new(
    config: Config,
    config_path: PathBuf,
    player: MpvController,
    publisher: Box<dyn StatePublisher>,
  ) -> Self {
    Self {
      config,
      config_path,
      stations: StationList::default(),
      player,
      publisher,
    }
  }

  /// Read the configured playlist. A missing playlist is not fatal.
  pub fn load_stations(&mut self) {
    if let Err(e) = self.stations.load(Path::new(&self.config.m3u_path)) {
      log::warn!("{}; keeping {} station(s)", e, self.stations.len());
    }
  }

  pub async fn start_player(&mut self) -> Result<(), MpvError> {
    let config = &self.config;
    self
      .player
      .start(
        config.mpv_path(),
        Path::new(&config.mpv_socket_path),
        &config.mpv_extra_args,
      )
      .await
  }

  fn station_json(&self) -> Option<Value> {
    let index = self.stations.current_index()?;
    let station = self.stations.current()?;
    Some(json!({
      "index": index + 1,
      "name": station.name,
      "url": station.url,
    }))
  }

  /// Snapshot built from cached state only.
  pub fn snapshot(&self) -> Value {
    let state = self.player.state();
    let mut snapshot = json!({
      "playing": state.playing,
      "paused": state.paused,
      "volume": state.volume,
      "metadata": state.media_title,
      "station_count": self.stations.len(),
    });
    if let (Some(station), Some(map)) = (self.station_json(), snapshot.as_object_mut()) {
      map.insert("station".to_string(), station);
    }
    snapshot
  }

  /// Snapshot with volume and title fetched from the player, falling back to
  /// cached values when it does not answer. The title comes from
  /// `media-title`, which may replace an `icy-title` seen in events.
  pub async fn status(&mut self) -> Value {
    if let Err(e) = self.player.get_volume().await {
      log::debug!("status: volume query failed ({}), using cached value", e);
    }
    if let Err(e) = self.player.get_metadata_title().await {
      log::debug!("status: title query failed ({}), using cached value", e);
    }
    self.snapshot()
  }

  pub fn publish_state(&mut self) {
    let snapshot = self.snapshot();
    self.publisher.publish_state(&snapshot);
  }

  pub fn publish_volume(&mut self, volume: i64) {
    self.publisher.publish_volume(volume);
  }

  /// Play the selected station and announce it.
  pub async fn play_current(&mut self) -> Result<(), String> {
    let url = match self.stations.current() {
      Some(station) => station.url.clone(),
      None => return Err("no stations available".to_string()),
    };
    self.player.play(&url).await.map_err(|e| e.to_string())?;

    if let Some(station) = self.station_json() {
      self.publisher.publish_station(&station);
    }
    self.publish_state();
    Ok(())
  }

  /// Re-read config and playlist. The player is only restarted when its
  /// session is gone.
  pub async fn reload(&mut self) -> Result<(), String> {
    match Config::load_from(&self.config_path) {
      Ok(config) => {
        if config.mpv_socket_path != self.config.mpv_socket_path
          || config.ipc_socket_path != self.config.ipc_socket_path
        {
          log::warn!("socket path changes take effect after a restart");
        }
        self.config = config;
      }
      Err(e) => log::error!("reload: {}; keeping current config", e),
    }

    logging::apply(&self.config.log_level);
    self.publisher.set_prefix(&self.config.topic_prefix);
    self.load_stations();

    if !self.player.is_alive() {
      log::warn!("mpv is not running, restarting it");
      self.player.shutdown().await;
      self.start_player().await.map_err(|e| e.to_string())?;
    }

    log::info!("config reloaded");
    Ok(())
  }

  /// Fold one player event into state and publish what changed.
  pub fn handle_player_event(&mut self, event: &MpvEvent) {
    match self.player.apply_event(event) {
      Some(PlayerNotice::Metadata(title)) => {
        log::info!("metadata: {}", title);
        self.publisher.publish_metadata(&title);
      }
      Some(PlayerNotice::Pause(_)) | Some(PlayerNotice::EndFile) => self.publish_state(),
      Some(PlayerNotice::Volume(volume)) => log::debug!("volume is now {}", volume),
      None => log::trace!("ignoring mpv event {}", event.event),
    }
  }

  /// The player's socket closed.
  pub fn handle_player_lost(&mut self) {
    log::error!("mpv connection closed; commands will fail until reload");
    self.player.connection_lost();
    self.publish_state();
  }

  pub async fn shutdown(&mut self) {
    self.player.shutdown().await;
    self.publisher.disconnect();
  }
}

/// Forward SIGHUP, SIGTERM and SIGINT to the reactor.
pub fn spawn_signal_listener() -> std::io::Result<mpsc::UnboundedReceiver<DaemonSignal>> {
  let mut hangup = signal(SignalKind::hangup())?;
  let mut terminate = signal(SignalKind::terminate())?;
  let mut interrupt = signal(SignalKind::interrupt())?;
  let (tx, rx) = mpsc::unbounded_channel();

  tokio::spawn(async move {
    loop {
      let sig = tokio::select! {
        _ = hangup.recv() => {
          log::info!("SIGHUP: reloading config");
          DaemonSignal::Reload
        }
        _ = terminate.recv() => {
          log::info!("SIGTERM: shutting down");
          DaemonSignal::Terminate
        }
        _ = interrupt.recv() => {
          log::info!("SIGINT: shutting down");
          DaemonSignal::Terminate
        }
      };
      if tx.send(sig).is_err() {
        break;
      }
    }
  });

  Ok(rx)
}

async fn next_event(events: Option<&async_channel::Receiver<MpvEvent>>) -> Option<MpvEvent> {
  match events {
    Some(rx) => rx.recv().await.ok(),
    None => std::future::pending().await,
  }
}

/// Serve one control connection to completion.
pub async fn serve_connection(radio: &mut Radio, mut conn: Connection) {
  let response = match conn.read_request().await {
    Ok(request) => command::dispatch(radio, &request).await,
    Err(RequestError::Malformed(e)) => {
      log::warn!("malformed control request: {}", e);
      ControlResponse::error(format!("invalid request JSON: {e}"))
    }
    Err(e) => {
      log::debug!("dropping control connection: {}", e);
      return;
    }
  };

  if let Err(e) = conn.respond(&response).await {
    log::warn!("failed to write control response: {}", e);
  }
}

/// Run until a terminate signal arrives or the signal source goes away.
pub async fn event_loop(
  radio: &mut Radio,
  server: &ControlServer,
  signals: &mut mpsc::UnboundedReceiver<DaemonSignal>,
) {
  loop {
    let events = radio.player.events();

    tokio::select! {
      signal = signals.recv() => match signal {
        Some(DaemonSignal::Reload) => {
          if let Err(e) = radio.reload().await {
            log::error!("reload failed: {}", e);
          }
        }
        Some(DaemonSignal::Terminate) | None => break,
      },
      accepted = server.accept() => match accepted {
        Ok(conn) => serve_connection(radio, conn).await,
        Err(e) => log::warn!("accept on {} failed: {}", server.path().display(), e),
      },
      event = next_event(events.as_ref()) => match event {
        Some(event) => {
          radio.handle_player_event(&event);
          if let Some(rx) = events.as_ref() {
            while let Ok(event) = rx.try_recv() {
              radio.handle_player_event(&event);
            }
          }
        }
        None => radio.handle_player_lost(),
      },
    }
  }
}

/// Start the daemon and block until it is told to stop.
pub async fn run(config: Config, config_path: PathBuf) -> Result<(), DaemonError> {
  log::info!("rpiradio daemon starting");

  let publisher = Box::new(LogPublisher::new(config.topic_prefix.clone()));
  let mut radio = Radio::new(config, config_path, MpvController::new(), publisher);

  radio.load_stations();
  if radio.stations.is_empty() {
    log::warn!("no stations loaded, continuing anyway");
  }

  radio.start_player().await?;

  let server = match ControlServer::bind(Path::new(&radio.config.ipc_socket_path)) {
    Ok(server) => server,
    Err(e) => {
      radio.shutdown().await;
      return Err(e);
    }
  };

  let mut signals = match spawn_signal_listener() {
    Ok(signals) => signals,
    Err(e) => {
      server.close();
      radio.shutdown().await;
      return Err(io_err("signal handlers", e));
    }
  };

  log::info!("daemon ready");
  event_loop(&mut radio, &server, &mut signals).await;

  log::info!("shutting down");
  server.close();
  radio.shutdown().await;
  Ok(())
}
