//! Disk subsystem: the synchronous, blocking half of the storage node
//! (spec §3, §4.2, §4.3). Everything under here runs on dedicated OS
//! threads and never touches a socket.

pub mod append;
pub mod delete;
pub mod fileop;
pub mod link;
pub mod modify;
pub mod read;
pub mod truncate;
pub mod worker;
pub mod write;

pub use fileop::{FileOpContext, FileOpKind, FileOpOutcome, Origin};
pub use worker::DiskWorkerPool;
