//! Tracker collaborator interface (spec §6).
//!
//! The storage node reports heartbeats to, and receives group membership
//! updates from, a tracker server that this crate treats as an external
//! collaborator reachable over the same wire framing as storage-to-storage
//! traffic. Kept as a trait so tests can swap in an in-memory fake instead of
//! dialing a real tracker, the way the teacher abstracts its VFS backing
//! store behind a trait.

use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::node::{NodeStatus, StorageNode};
use crate::protocol::primitive::{read_exact_vec, read_fixed_str, read_u64, read_u8, write_fixed_str, write_u64, write_u8};
use crate::stats::HeartbeatSnapshot;

/// Tracker-facing command bytes. These ride the same 10-byte header as the
/// storage-to-storage protocol but belong to a disjoint command space, since
/// a tracker and a storage node never share a listener in spec §6.
const CMD_REGISTER: u8 = 1;
const CMD_HEARTBEAT: u8 = 2;

#[derive(Debug, Clone)]
pub struct GroupMembership {
    pub group_name: String,
    pub nodes: Vec<StorageNode>,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Sends a heartbeat and returns the tracker's current view of this
    /// node's group, so membership/status changes ride piggyback on the
    /// same round trip (spec §4.9).
    async fn heartbeat(&self, snapshot: HeartbeatSnapshot) -> std::io::Result<GroupMembership>;

    /// Registers this server with the tracker at startup, before the first
    /// heartbeat (spec §6 Environment).
    async fn register(&self, server_id: &str, group_name: &str) -> std::io::Result<GroupMembership>;
}

fn status_to_byte(status: NodeStatus) -> u8 {
    match status {
        NodeStatus::Init => 0,
        NodeStatus::WaitSync => 1,
        NodeStatus::Syncing => 2,
        NodeStatus::Deleted => 3,
        NodeStatus::Offline => 4,
        NodeStatus::Online => 5,
        NodeStatus::Active => 6,
        NodeStatus::None => 7,
        NodeStatus::IpChanged => 8,
        NodeStatus::Recovery => 9,
    }
}

fn status_from_byte(byte: u8) -> NodeStatus {
    match byte {
        0 => NodeStatus::Init,
        1 => NodeStatus::WaitSync,
        2 => NodeStatus::Syncing,
        3 => NodeStatus::Deleted,
        4 => NodeStatus::Offline,
        5 => NodeStatus::Online,
        6 => NodeStatus::Active,
        8 => NodeStatus::IpChanged,
        9 => NodeStatus::Recovery,
        _ => NodeStatus::None,
    }
}

fn encode_request(cmd: u8, server_id: &str, group_name: &str, snapshot: &HeartbeatSnapshot) -> Vec<u8> {
    let mut body = Vec::new();
    write_u64(&mut body, server_id.len() as u64).unwrap();
    body.extend_from_slice(server_id.as_bytes());
    write_fixed_str(&mut body, group_name, crate::protocol::primitive::GROUP_NAME_LEN).unwrap();
    write_u64(&mut body, snapshot.uptime_secs).unwrap();
    for field in [
        snapshot.counters.uploads,
        snapshot.counters.downloads,
        snapshot.counters.deletes,
        snapshot.counters.appends,
        snapshot.counters.modifies,
        snapshot.counters.sync_in,
        snapshot.counters.sync_out,
        snapshot.counters.connections_accepted,
        snapshot.counters.protocol_errors,
        snapshot.counters.disk_errors,
    ] {
        write_u64(&mut body, field).unwrap();
    }
    write_u8(&mut body, snapshot.store_paths.len() as u8).unwrap();
    for path in &snapshot.store_paths {
        write_u8(&mut body, path.index).unwrap();
        write_u64(&mut body, path.total_bytes).unwrap();
        write_u64(&mut body, path.free_bytes).unwrap();
    }

    let mut framed = crate::protocol::Header::request(cmd, body.len() as u64).to_bytes().to_vec();
    framed.extend_from_slice(&body);
    framed
}

fn decode_membership(body: &[u8]) -> std::io::Result<GroupMembership> {
    let mut cursor = Cursor::new(body);
    let group_name = read_fixed_str(&mut cursor, crate::protocol::primitive::GROUP_NAME_LEN)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let node_count = read_u8(&mut cursor).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let mut nodes = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let id_len = read_u64(&mut cursor).map_err(to_io_err)? as usize;
        let server_id = String::from_utf8(read_exact_vec(&mut cursor, id_len).map_err(to_io_err)?)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 server id"))?;
        let addr_len = read_u64(&mut cursor).map_err(to_io_err)? as usize;
        let addr_str = String::from_utf8(read_exact_vec(&mut cursor, addr_len).map_err(to_io_err)?)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 addr"))?;
        let addr = addr_str
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed peer addr"))?;
        let status = status_from_byte(read_u8(&mut cursor).map_err(to_io_err)?);
        let join_time = read_u64(&mut cursor).map_err(to_io_err)? as u32;
        let sync_until_timestamp = read_u64(&mut cursor).map_err(to_io_err)? as u32;
        nodes.push(StorageNode { server_id, addr, status, join_time, sync_until_timestamp });
    }
    Ok(GroupMembership { group_name, nodes })
}

fn to_io_err(e: crate::error::ProtocolError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

/// A tracker client that dials one of several configured tracker addresses,
/// failing over to the next on connection error (spec §6).
pub struct TcpTracker {
    addrs: Vec<std::net::SocketAddr>,
}

impl TcpTracker {
    pub fn new(addrs: Vec<std::net::SocketAddr>) -> Self {
        Self { addrs }
    }

    async fn exchange(&self, frame: &[u8]) -> std::io::Result<GroupMembership> {
        let mut last_err = None;
        for addr in &self.addrs {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(mut stream) => match Self::roundtrip(&mut stream, frame).await {
                    Ok(membership) => return Ok(membership),
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "no tracker reachable")))
    }

    async fn roundtrip(stream: &mut tokio::net::TcpStream, frame: &[u8]) -> std::io::Result<GroupMembership> {
        stream.write_all(frame).await?;
        let mut header_buf = [0u8; crate::protocol::header::HEADER_LEN];
        stream.read_exact(&mut header_buf).await?;
        let header = crate::protocol::Header::parse(&mut &header_buf[..], usize::MAX)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        if header.status != 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("tracker rejected with status {}", header.status)));
        }
        let mut body = vec![0u8; header.body_len as usize];
        stream.read_exact(&mut body).await?;
        decode_membership(&body)
    }
}

#[async_trait]
impl Tracker for TcpTracker {
    async fn heartbeat(&self, snapshot: HeartbeatSnapshot) -> std::io::Result<GroupMembership> {
        let server_id = snapshot.server_id.clone();
        let frame = encode_request(CMD_HEARTBEAT, &server_id, "", &snapshot);
        self.exchange(&frame).await
    }

    async fn register(&self, server_id: &str, group_name: &str) -> std::io::Result<GroupMembership> {
        let snapshot = HeartbeatSnapshot {
            server_id: server_id.to_string(),
            counters: Default::default(),
            store_paths: Vec::new(),
            uptime_secs: 0,
        };
        let frame = encode_request(CMD_REGISTER, server_id, group_name, &snapshot);
        self.exchange(&frame).await
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeTracker {
        pub membership: Mutex<GroupMembership>,
    }

    #[async_trait]
    impl Tracker for FakeTracker {
        async fn heartbeat(&self, _snapshot: HeartbeatSnapshot) -> std::io::Result<GroupMembership> {
            Ok(self.membership.lock().await.clone())
        }

        async fn register(&self, _server_id: &str, _group_name: &str) -> std::io::Result<GroupMembership> {
            Ok(self.membership.lock().await.clone())
        }
    }

    impl Default for GroupMembership {
        fn default() -> Self {
            Self { group_name: String::new(), nodes: Vec::new() }
        }
    }
}
