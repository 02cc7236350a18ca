//! Daemon configuration with persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/rpiradio/config.json";
/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "RPIRADIO_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("cannot read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("cannot write {}: {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid config {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("{0}")]
  Invalid(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Playlist with the stations.
  pub m3u_path: String,

  /// State publication broker.
  pub mqtt_host: String,
  pub mqtt_port: u16,
  pub topic_prefix: String,

  /// One of trace, debug, info, warn, error. `LOG_LEVEL` wins if set.
  pub log_level: String,

  /// Custom MPV executable path (None = auto-detect).
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  pub mpv_extra_args: Vec<String>,

  /// Socket the control protocol listens on.
  pub ipc_socket_path: String,

  /// Socket MPV creates for its JSON IPC.
  pub mpv_socket_path: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      m3u_path: "/etc/rpiradio/stations.m3u".to_string(),
      mqtt_host: "localhost".to_string(),
      mqtt_port: 1883,
      topic_prefix: "rpiradio".to_string(),
      log_level: "info".to_string(),
      mpv_path: None,
      mpv_extra_args: Vec::new(),
      ipc_socket_path: "/tmp/rpiradio.sock".to_string(),
      mpv_socket_path: "/tmp/rpiradio-mpv.sock".to_string(),
    }
  }
}

/// Where the configuration lives: `$RPIRADIO_CONFIG`, then the system file,
/// then the per-user config directory.
pub fn config_path() -> PathBuf {
  if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
    return PathBuf::from(path);
  }

  let system = PathBuf::from(SYSTEM_CONFIG_PATH);
  if system.exists() {
    return system;
  }

  dirs::config_dir()
    .map(|dir| dir.join("rpiradio").join("config.json"))
    .filter(|path| path.exists())
    .unwrap_or(system)
}

impl Config {
  /// Read and validate the file at `path`.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_json(&text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
  }

  /// Load `path`, falling back to defaults when it is missing or broken.
  pub fn load(path: &Path) -> Self {
    match Self::load_from(path) {
      Ok(config) => {
        log::info!("loaded config from {}", path.display());
        config
      }
      Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
        log::info!("no config at {}, using defaults", path.display());
        Self::default()
      }
      Err(e) => {
        log::error!("failed to load config: {}", e);
        Self::default()
      }
    }
  }

  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let json = serde_json::to_string_pretty(self).map_err(|e| write_err(e.into()))?;
    std::fs::write(path, json + "\n").map_err(write_err)
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or_default()
  }

  pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }

  pub fn mpv_path(&self) -> Option<&Path> {
    self
      .mpv_path
      .as_deref()
      .filter(|s| !s.is_empty())
      .map(Path::new)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.ipc_socket_path.trim().is_empty() {
      return Err("ipc_socket_path cannot be empty".to_string());
    }
    if self.mpv_socket_path.trim().is_empty() {
      return Err("mpv_socket_path cannot be empty".to_string());
    }
    if self.ipc_socket_path == self.mpv_socket_path {
      return Err("ipc_socket_path and mpv_socket_path must differ".to_string());
    }
    if self.mqtt_port == 0 {
      return Err("mqtt_port must be between 1 and 65535".to_string());
    }
    if crate::logging::parse_level(&self.log_level).is_none() {
      return Err(format!("unknown log_level '{}'", self.log_level));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Config {
    Config {
      m3u_path: "/srv/radio.m3u".to_string(),
      mqtt_host: "broker.lan".to_string(),
      mqtt_port: 8883,
      topic_prefix: "kitchen".to_string(),
      log_level: "debug".to_string(),
      mpv_path: Some("/opt/mpv/bin/mpv".to_string()),
      mpv_extra_args: vec!["--ao=alsa".to_string(), "--cache=yes".to_string()],
      ipc_socket_path: "/run/rpiradio.sock".to_string(),
      mpv_socket_path: "/run/rpiradio-mpv.sock".to_string(),
    }
  }

  #[test]
  fn test_json_round_trip_keeps_every_field() {
    let config = sample();
    let json = config.to_json().to_string();
    assert_eq!(Config::from_json(&json).unwrap(), config);
  }

  #[test]
  fn test_missing_fields_take_defaults() {
    let config = Config::from_json(r#"{"m3u_path": "/x.m3u"}"#).unwrap();
    assert_eq!(config.m3u_path, "/x.m3u");
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.ipc_socket_path, Config::default().ipc_socket_path);
  }

  #[test]
  fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    sample().save(&path).unwrap();
    assert_eq!(Config::load_from(&path).unwrap(), sample());
  }

  #[test]
  fn test_load_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(Config::load(&dir.path().join("absent.json")), Config::default());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(Config::load_from(&broken), Err(ConfigError::Parse { .. })));
    assert_eq!(Config::load(&broken), Config::default());
  }

  #[test]
  fn test_validate() {
    assert!(Config::default().validate().is_ok());

    let mut config = sample();
    config.mpv_socket_path = config.ipc_socket_path.clone();
    assert!(config.validate().is_err());

    let mut config = sample();
    config.log_level = "loud".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_empty_mpv_path_means_autodetect() {
    let mut config = sample();
    config.mpv_path = Some(String::new());
    assert!(config.mpv_path().is_none());
  }
}
