//! Asynchronous replication: per-peer readers tailing the binlog, persisted
//! marks, and new-peer bootstrap (spec §4.7).

pub mod bootstrap;
pub mod mark;
pub mod peer_link;
pub mod reader;

pub use mark::ReplicationMark;
pub use peer_link::TcpPeerLink;
pub use reader::{PeerLink, ReplicationReader, SyncPayload};
