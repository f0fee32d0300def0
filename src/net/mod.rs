//! Network subsystem: accept loop and per-connection framing (spec §4.1).
//! Everything here runs on the tokio reactor and never blocks on disk.

pub mod connection;
pub mod listener;
pub mod timers;

pub use connection::{ConnectionConfig, RequestHandler};
