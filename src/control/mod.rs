//! Local control protocol: newline-delimited JSON over a Unix socket.

pub mod client;
mod protocol;
mod server;

pub use client::{send_request, ControlError};
pub use protocol::{ControlRequest, ControlResponse, Status};
pub use server::{Connection, ControlServer, RequestError};
