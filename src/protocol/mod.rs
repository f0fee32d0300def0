//! Wire protocol: framing, command space, and per-command request/response
//! bodies (spec §4.1, §6).

pub mod command;
pub mod header;
pub mod primitive;
pub mod requests;
pub mod responses;

pub use command::{Command, CommandGroup};
pub use header::Header;
