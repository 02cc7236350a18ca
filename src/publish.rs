//! State publication. Publishing is best-effort: implementations log their
//! own failures and never hand errors back to the control path.

use serde_json::Value;

pub trait StatePublisher {
  /// Full playback snapshot.
  fn publish_state(&mut self, state: &Value);

  fn publish_station(&mut self, station: &Value);

  fn publish_metadata(&mut self, title: &str);

  fn publish_volume(&mut self, volume: i64);

  /// Topic prefix changed on reload.
  fn set_prefix(&mut self, _prefix: &str) {}

  fn disconnect(&mut self) {}
}

/// Writes every publication to the log as `<prefix>/<subtopic> <payload>`.
pub struct LogPublisher {
  prefix: String,
}

impl LogPublisher {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  fn publish(&self, subtopic: &str, payload: &str) {
    log::info!(target: "publish", "{}/{} {}", self.prefix, subtopic, payload);
  }
}

impl StatePublisher for LogPublisher {
  fn publish_state(&mut self, state: &Value) {
    self.publish("state", &state.to_string());
  }

  fn publish_station(&mut self, station: &Value) {
    self.publish("station", &station.to_string());
  }

  fn publish_metadata(&mut self, title: &str) {
    self.publish("metadata", title);
  }

  fn publish_volume(&mut self, volume: i64) {
    self.publish("volume", &volume.to_string());
  }

  fn set_prefix(&mut self, prefix: &str) {
    self.prefix = prefix.to_string();
  }

  fn disconnect(&mut self) {
    log::debug!("publisher for {} closed", self.prefix);
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::Arc;

  use parking_lot::Mutex;
  use serde_json::Value;

  use super::StatePublisher;

  /// One captured publication.
  #[derive(Debug, Clone, PartialEq)]
  pub enum Published {
    State(Value),
    Station(Value),
    Metadata(String),
    Volume(i64),
    Disconnect,
  }

  /// Records publications; clones share the same log.
  #[derive(Clone, Default)]
  pub struct RecordingPublisher {
    log: Arc<Mutex<Vec<Published>>>,
  }

  impl RecordingPublisher {
    pub fn published(&self) -> Vec<Published> {
      self.log.lock().clone()
    }

    pub fn take(&self) -> Vec<Published> {
      std::mem::take(&mut *self.log.lock())
    }
  }

  impl StatePublisher for RecordingPublisher {
    fn publish_state(&mut self, state: &Value) {
      self.log.lock().push(Published::State(state.clone()));
    }

    fn publish_station(&mut self, station: &Value) {
      self.log.lock().push(Published::Station(station.clone()));
    }

    fn publish_metadata(&mut self, title: &str) {
      self.log.lock().push(Published::Metadata(title.to_string()));
    }

    fn publish_volume(&mut self, volume: i64) {
      self.log.lock().push(Published::Volume(volume));
    }

    fn disconnect(&mut self) {
      self.log.lock().push(Published::Disconnect);
    }
  }
}
