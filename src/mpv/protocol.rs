//! Wire format of mpv's JSON IPC: one JSON object per line in each
//! direction. See https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Observer ID for the `metadata` property.
pub const OBS_METADATA: i64 = 1;
/// Observer ID for the `pause` property.
pub const OBS_PAUSE: i64 = 2;
/// Observer ID for the `volume` property.
pub const OBS_VOLUME: i64 = 3;

/// Outbound request line.
///
/// The request ID is assigned by the connection when the command is sent
/// synchronously; fire-and-forget commands go out without one.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_id: Option<i64>,
}

impl MpvCommand {
  pub fn new(args: Vec<Value>) -> Self {
    Self {
      command: args,
      request_id: None,
    }
  }

  /// Replace whatever is playing with `url`.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into(), "replace".into()])
  }

  /// Stop playback and clear the playlist; the player stays idle.
  pub fn stop() -> Self {
    Self::new(vec!["stop".into()])
  }

  /// Set volume (0-150).
  pub fn set_volume(volume: i64) -> Self {
    Self::new(vec!["set_property".into(), "volume".into(), volume.into()])
  }

  /// Subscribe to changes of `name`; events carry `id` back.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }

  /// Flip a boolean property such as `pause` or `mute`.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  /// Name of the command (first element), for logging.
  pub fn name(&self) -> &str {
    self
      .command
      .first()
      .and_then(Value::as_str)
      .unwrap_or("<empty>")
  }

  pub(crate) fn with_request_id(mut self, id: i64) -> Self {
    self.request_id = Some(id);
    self
  }
}

/// Reply to a request.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// `success`, or what went wrong.
  #[serde(default)]
  pub error: String,
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID. MPV echoes 0 for commands sent without one.
  #[serde(default)]
  pub request_id: i64,
}

impl MpvResponse {
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Unsolicited notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvEvent {
  pub event: String,
  /// Observer id, property-change only.
  #[serde(default)]
  pub id: Option<i64>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub data: Option<Value>,
  /// Why an `end-file` happened: eof, stop, quit, error, redirect.
  #[serde(default)]
  pub reason: Option<String>,
}

impl MpvEvent {
  /// Returns `(name, data)` for a property-change event.
  pub fn as_property_change(&self) -> Option<(&str, &Value)> {
    if self.event != "property-change" {
      return None;
    }
    let name = self.name.as_deref()?;
    Some((name, self.data.as_ref().unwrap_or(&Value::Null)))
  }
}

/// One inbound line, classified.
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Anything carrying an `event` key is an event; everything else is a
  /// reply, correlated by `request_id`.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("event").is_some() {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    }
  }
}

/// Extract a stream title from an MPV `metadata` property value.
///
/// Radio streams put the current song in `icy-title`; files use `title`.
pub fn metadata_title(data: &Value) -> String {
  ["icy-title", "title"]
    .iter()
    .find_map(|key| data.get(*key).and_then(Value::as_str))
    .unwrap_or_default()
    .to_string()
}
