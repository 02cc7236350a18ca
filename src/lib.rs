pub mod command;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod mpv;
pub mod publish;
pub mod stations;

pub use config::Config;
pub use daemon::{run, Radio};
pub use error::DaemonError;
