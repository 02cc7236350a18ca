//! In-process stand-in for an MPV instance speaking JSON IPC over a duplex
//! pipe. Only compiled for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::ipc::MpvIpc;

enum Out {
  Raw(String),
  HangUp,
}

struct FakeState {
  received: Vec<Value>,
  ignored: HashSet<String>,
  before_reply: HashMap<String, Vec<Value>>,
  volume: f64,
  pause: bool,
  mute: bool,
  loaded: Option<String>,
  media_title: String,
}

/// Handle to a running fake player.
pub(crate) struct FakeMpv {
  state: Arc<Mutex<FakeState>>,
  out_tx: mpsc::UnboundedSender<Out>,
}

impl FakeMpv {
  /// Start a fake player and return a connection to it.
  pub(crate) fn spawn() -> (MpvIpc, FakeMpv) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(client);
    let ipc = MpvIpc::setup(reader, writer);

    let state = Arc::new(Mutex::new(FakeState {
      received: Vec::new(),
      ignored: HashSet::new(),
      before_reply: HashMap::new(),
      volume: 100.0,
      pause: false,
      mute: false,
      loaded: None,
      media_title: String::new(),
    }));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve(server, state.clone(), out_rx));

    (ipc, FakeMpv { state, out_tx })
  }

  /// Every JSON command received so far, in order.
  pub(crate) fn received(&self) -> Vec<Value> {
    self.state.lock().received.clone()
  }

  /// The `command` arrays received so far.
  pub(crate) fn commands(&self) -> Vec<Vec<Value>> {
    self
      .received()
      .into_iter()
      .filter_map(|v| v.get("command").and_then(Value::as_array).cloned())
      .collect()
  }

  /// Never answer commands named `name`.
  pub(crate) fn ignore(&self, name: &str) {
    self.state.lock().ignored.insert(name.to_string());
  }

  /// Answer commands named `name` again.
  pub(crate) fn answer(&self, name: &str) {
    self.state.lock().ignored.remove(name);
  }

  /// Emit `event` right before the next reply to a command named `name`.
  pub(crate) fn emit_before_reply(&self, name: &str, event: Value) {
    self
      .state
      .lock()
      .before_reply
      .entry(name.to_string())
      .or_default()
      .push(event);
  }

  pub(crate) fn set_media_title(&self, title: &str) {
    self.state.lock().media_title = title.to_string();
  }

  pub(crate) fn volume(&self) -> f64 {
    self.state.lock().volume
  }

  pub(crate) fn loaded(&self) -> Option<String> {
    self.state.lock().loaded.clone()
  }

  pub(crate) fn emit(&self, event: Value) {
    self.emit_raw(&format!("{}\n", event));
  }

  pub(crate) fn emit_raw(&self, raw: &str) {
    let _ = self.out_tx.send(Out::Raw(raw.to_string()));
  }

  /// Close the socket as if the player had died.
  pub(crate) fn hang_up(&self) {
    let _ = self.out_tx.send(Out::HangUp);
  }
}

async fn serve(
  stream: tokio::io::DuplexStream,
  state: Arc<Mutex<FakeState>>,
  mut out_rx: mpsc::UnboundedReceiver<Out>,
) {
  let (reader, mut writer) = tokio::io::split(stream);
  let mut lines = BufReader::new(reader).lines();

  loop {
    tokio::select! {
      Some(out) = out_rx.recv() => match out {
        Out::Raw(raw) => {
          if writer.write_all(raw.as_bytes()).await.is_err() {
            return;
          }
        }
        Out::HangUp => return,
      },
      line = lines.next_line() => {
        let Ok(Some(line)) = line else { return };
        let Ok(request) = serde_json::from_str::<Value>(&line) else { continue };
        let (output, quit) = respond(&state, request);
        for out in output {
          if writer.write_all(format!("{}\n", out).as_bytes()).await.is_err() {
            return;
          }
        }
        if quit {
          return;
        }
      }
    }
  }
}

/// Apply one command to the fake player; returns the lines to send back and
/// whether the player quits.
fn respond(state: &Mutex<FakeState>, request: Value) -> (Vec<Value>, bool) {
  let mut s = state.lock();
  s.received.push(request.clone());

  let args = request
    .get("command")
    .and_then(Value::as_array)
    .cloned()
    .unwrap_or_default();
  let name = args.first().and_then(Value::as_str).unwrap_or("").to_string();
  let request_id = request.get("request_id").and_then(Value::as_i64).unwrap_or(0);
  let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

  let mut after = Vec::new();
  let mut quit = false;
  let data = match name.as_str() {
    "get_property" => match arg(1).as_str().unwrap_or("") {
      "volume" => Ok(json!(s.volume)),
      "pause" => Ok(json!(s.pause)),
      "mute" => Ok(json!(s.mute)),
      "media-title" => Ok(json!(s.media_title)),
      _ => Err("property unavailable"),
    },
    "set_property" => {
      if arg(1) == json!("volume") {
        s.volume = arg(2).as_f64().unwrap_or(s.volume);
      }
      Ok(Value::Null)
    }
    "cycle" => {
      match arg(1).as_str().unwrap_or("") {
        "pause" => {
          s.pause = !s.pause;
          after.push(json!({"event": "property-change", "id": 2, "name": "pause", "data": s.pause}));
        }
        "mute" => s.mute = !s.mute,
        _ => {}
      }
      Ok(Value::Null)
    }
    "loadfile" => {
      s.loaded = arg(1).as_str().map(str::to_string);
      s.pause = false;
      Ok(Value::Null)
    }
    "stop" => {
      if s.loaded.take().is_some() {
        after.push(json!({"event": "end-file", "reason": "stop"}));
      }
      Ok(Value::Null)
    }
    "quit" => {
      quit = true;
      Ok(Value::Null)
    }
    "observe_property" => Ok(Value::Null),
    _ => Err("invalid parameter"),
  };

  let mut output = s.before_reply.remove(&name).unwrap_or_default();
  if s.ignored.contains(&name) {
    return (output, quit);
  }

  output.push(match data {
    Ok(data) => json!({"request_id": request_id, "error": "success", "data": data}),
    Err(error) => json!({"request_id": request_id, "error": error}),
  });
  output.extend(after);
  (output, quit)
}
