//! Process logging on top of the `log` facade.

use log::LevelFilter;

/// Environment variable that overrides the configured level.
pub const LEVEL_ENV: &str = "LOG_LEVEL";

pub fn parse_level(level: &str) -> Option<LevelFilter> {
  match level.trim().to_ascii_lowercase().as_str() {
    "trace" => Some(LevelFilter::Trace),
    "debug" => Some(LevelFilter::Debug),
    "info" => Some(LevelFilter::Info),
    "warn" | "warning" => Some(LevelFilter::Warn),
    "error" => Some(LevelFilter::Error),
    "off" => Some(LevelFilter::Off),
    _ => None,
  }
}

/// Level to run at: `LOG_LEVEL` if set, else `configured`, else info.
pub fn effective_level(configured: &str) -> LevelFilter {
  let from_env = std::env::var(LEVEL_ENV).ok().filter(|v| !v.is_empty());
  from_env
    .as_deref()
    .and_then(parse_level)
    .or_else(|| parse_level(configured))
    .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. The filter is left wide open so `apply` can
/// later raise or lower the level at runtime.
pub fn init(configured: &str) {
  let level = effective_level(configured);
  let result = env_logger::Builder::new()
    .filter_level(LevelFilter::Trace)
    .format_timestamp_millis()
    .format_target(true)
    .try_init();
  if result.is_err() {
    log::debug!("logger already installed");
  }
  log::set_max_level(level);
}

/// Re-apply the level after a config reload.
pub fn apply(configured: &str) {
  let level = effective_level(configured);
  if level != log::max_level() {
    log::info!("log level -> {}", level);
  }
  log::set_max_level(level);
}
