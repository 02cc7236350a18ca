//! Wire types of the local control protocol: one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
  #[serde(default)]
  pub command: String,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub args: Map<String, Value>,
}

impl ControlRequest {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      args: Map::new(),
    }
  }

  pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.args.insert(key.to_string(), value.into());
    self
  }

  pub fn arg(&self, key: &str) -> Option<&Value> {
    self.args.get(key).filter(|v| !v.is_null())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Ok,
  Error,
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl ControlResponse {
  pub fn ok() -> Self {
    Self {
      status: Status::Ok,
      data: None,
      message: None,
    }
  }

  pub fn ok_with(data: Value) -> Self {
    Self {
      status: Status::Ok,
      data: Some(data),
      message: None,
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      status: Status::Error,
      data: None,
      message: Some(message.into()),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == Status::Ok
  }

  /// `data` on success, the message on failure.
  pub fn into_result(self) -> Result<Option<Value>, String> {
    match self.status {
      Status::Ok => Ok(self.data),
      Status::Error => Err(self.message.unwrap_or_else(|| "unknown error".to_string())),
    }
  }
}
