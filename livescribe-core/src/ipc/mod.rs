//! IPC types exchanged with the host application.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever transport it owns (JSON lines, FFI, sockets).

pub mod commands;
pub mod events;
pub mod sink;
