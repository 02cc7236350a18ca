//! Control commands. Each handler works on the daemon state and yields the
//! response `data`, or a message for the client on failure.

use serde_json::{json, Value};

use crate::control::{ControlRequest, ControlResponse};
use crate::daemon::Radio;

/// Step used by `volume up` / `volume down`.
pub const VOLUME_STEP: i64 = 5;

type CommandResult = Result<Option<Value>, String>;

/// Run one control request against the daemon.
pub async fn dispatch(radio: &mut Radio, request: &ControlRequest) -> ControlResponse {
  let result = match request.command.as_str() {
    "play" => play(radio, request).await,
    "stop" => stop(radio).await,
    "next" => next(radio).await,
    "prev" => prev(radio).await,
    "toggle" => toggle(radio).await,
    "volume" => volume(radio, request).await,
    "list" => list(radio),
    "status" => status(radio).await,
    "reload" => reload(radio).await,
    other => Err(format!("unknown command: {other}")),
  };

  match result {
    Ok(Some(data)) => ControlResponse::ok_with(data),
    Ok(None) => ControlResponse::ok(),
    Err(message) => {
      log::warn!("command '{}' failed: {}", request.command, message);
      ControlResponse::error(message)
    }
  }
}

/// Play the 1-based `station` argument. Without one, or with a value of zero
/// or less, the current station resumes.
async fn play(radio: &mut Radio, request: &ControlRequest) -> CommandResult {
  if let Some(arg) = request.arg("station") {
    let index = station_index(arg)?;
    if index > 0 {
      let selected = usize::try_from(index - 1).map_or(false, |i| radio.stations.select(i));
      if !selected {
        return Err(format!("invalid station index: {index}"));
      }
    }
  }
  radio.play_current().await?;
  Ok(None)
}

fn station_index(arg: &Value) -> Result<i64, String> {
  let parsed = match arg {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse::<i64>().ok(),
    _ => None,
  };
  parsed.ok_or_else(|| format!("invalid station index: {arg}"))
}

async fn stop(radio: &mut Radio) -> CommandResult {
  radio.player.stop().await.map_err(|e| e.to_string())?;
  radio.publish_state();
  Ok(None)
}

async fn next(radio: &mut Radio) -> CommandResult {
  if radio.stations.next().is_none() {
    return Err("no stations available".to_string());
  }
  radio.play_current().await?;
  Ok(None)
}

async fn prev(radio: &mut Radio) -> CommandResult {
  if radio.stations.prev().is_none() {
    return Err("no stations available".to_string());
  }
  radio.play_current().await?;
  Ok(None)
}

/// Pause or resume; with nothing loaded, start the selected station.
async fn toggle(radio: &mut Radio) -> CommandResult {
  if !radio.player.is_playing() && !radio.player.is_paused() {
    if radio.stations.current().is_none() && !radio.stations.select(0) {
      return Err("no stations available".to_string());
    }
    radio.play_current().await?;
    return Ok(None);
  }

  radio.player.toggle_pause().await.map_err(|e| e.to_string())?;
  radio.publish_state();
  Ok(None)
}

/// What a `volume` argument asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
enum VolumeChange {
  Query,
  Up,
  Down,
  Set(i64),
}

fn parse_volume(arg: Option<&Value>) -> Result<VolumeChange, String> {
  let arg = match arg {
    None => return Ok(VolumeChange::Query),
    Some(arg) => arg,
  };
  match arg {
    Value::String(s) => match s.trim() {
      "" => Ok(VolumeChange::Query),
      "up" => Ok(VolumeChange::Up),
      "down" => Ok(VolumeChange::Down),
      n => n
        .parse::<i64>()
        .map(VolumeChange::Set)
        .map_err(|_| format!("invalid volume value: {n}")),
    },
    Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f.round() as i64))
      .map(VolumeChange::Set)
      .ok_or_else(|| format!("invalid volume value: {n}")),
    other => Err(format!("invalid volume value: {other}")),
  }
}

async fn volume(radio: &mut Radio, request: &ControlRequest) -> CommandResult {
  let change = parse_volume(request.arg("value"))?;
  let target = match change {
    VolumeChange::Query => {
      let volume = radio.player.get_volume().await.map_err(|e| e.to_string())?;
      return Ok(Some(json!(volume)));
    }
    VolumeChange::Set(n) => n,
    VolumeChange::Up | VolumeChange::Down => {
      let current = radio.player.get_volume().await.map_err(|e| e.to_string())?;
      if change == VolumeChange::Up {
        current + VOLUME_STEP
      } else {
        current - VOLUME_STEP
      }
    }
  };

  let applied = radio
    .player
    .set_volume(target)
    .await
    .map_err(|e| e.to_string())?;
  radio.publish_volume(applied);
  Ok(Some(json!(applied)))
}

fn list(radio: &Radio) -> CommandResult {
  Ok(Some(json!(radio.stations.list())))
}

async fn status(radio: &mut Radio) -> CommandResult {
  Ok(Some(radio.status().await))
}

async fn reload(radio: &mut Radio) -> CommandResult {
  radio.reload().await?;
  Ok(None)
}
