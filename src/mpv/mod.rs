//! MPV IPC module - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection and process spawning
//! - `ipc.rs` - Async IPC connection; splits the socket into replies and events
//! - `protocol.rs` - JSON command/response/event types and serialization
//! - `session.rs` - Process + connection lifecycle (start, shutdown)
//! - `controller.rs` - High-level controller with cached playback state

mod controller;
mod ipc;
mod process;
mod protocol;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use controller::{clamp_volume, MpvController, MpvError, PlaybackState, PlayerNotice};
pub use ipc::{IpcError, MpvIpc};
pub use process::{find_mpv, ProcessError};
pub use protocol::{MpvCommand, MpvEvent, MpvResponse};
pub use session::MpvSession;
