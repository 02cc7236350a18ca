//! Station list loaded from an M3U playlist, with a current-station cursor.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
  #[error("cannot open playlist {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A named stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Station {
  pub name: String,
  pub url: String,
}

/// Ordered stations plus the index of the selected one.
#[derive(Debug, Default)]
pub struct StationList {
  stations: Vec<Station>,
  current: Option<usize>,
}

impl StationList {
  /// Replace the list with the contents of the playlist at `path`.
  /// On error the current list is left untouched.
  pub fn load(&mut self, path: &Path) -> Result<usize, StationError> {
    let text = std::fs::read_to_string(path).map_err(|source| StationError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    self.replace(parse_m3u(&text));
    log::info!("loaded {} stations from {}", self.len(), path.display());
    Ok(self.len())
  }

  /// Swap in a new list, keeping the cursor inside its bounds.
  pub fn replace(&mut self, stations: Vec<Station>) {
    self.stations = stations;
    self.current = match (self.current, self.stations.len()) {
      (_, 0) => None,
      (None, _) => Some(0),
      (Some(i), len) if i >= len => {
        log::warn!("selected station {} no longer exists, moving to {}", i + 1, len);
        Some(len - 1)
      }
      (current, _) => current,
    };
  }

  pub fn list(&self) -> &[Station] {
    &self.stations
  }

  pub fn len(&self) -> usize {
    self.stations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stations.is_empty()
  }

  pub fn current_index(&self) -> Option<usize> {
    self.current
  }

  pub fn current(&self) -> Option<&Station> {
    self.stations.get(self.current?)
  }

  /// Advance the cursor, wrapping to the first station.
  pub fn next(&mut self) -> Option<&Station> {
    let len = self.len();
    if len == 0 {
      return None;
    }
    let i = self.current.map_or(0, |i| (i + 1) % len);
    self.current = Some(i);
    self.stations.get(i)
  }

  /// Move the cursor back, wrapping to the last station.
  pub fn prev(&mut self) -> Option<&Station> {
    let len = self.len();
    if len == 0 {
      return None;
    }
    let i = self.current.map_or(len - 1, |i| (i + len - 1) % len);
    self.current = Some(i);
    self.stations.get(i)
  }

  /// Select by zero-based index.
  pub fn select(&mut self, index: usize) -> bool {
    if index >= self.len() {
      return false;
    }
    self.current = Some(index);
    true
  }
}

/// Parse extended M3U. `#EXTINF:<duration>,<name>` names the next URL; a URL
/// without one is named after its last path segment.
pub fn parse_m3u(text: &str) -> Vec<Station> {
  let mut stations = Vec::new();
  let mut pending_name: Option<String> = None;

  for line in text.lines().map(str::trim) {
    if line.is_empty() || line.starts_with("#EXTM3U") {
      continue;
    }
    if let Some(info) = line.strip_prefix("#EXTINF:") {
      pending_name = info
        .split_once(',')
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty());
      continue;
    }
    if line.starts_with('#') {
      continue;
    }

    let name = pending_name.take().unwrap_or_else(|| name_from_url(line));
    stations.push(Station {
      name,
      url: line.to_string(),
    });
  }

  stations
}

fn name_from_url(url: &str) -> String {
  match url.rsplit_once('/') {
    Some((_, last)) if !last.is_empty() => last.to_string(),
    _ => url.to_string(),
  }
}
