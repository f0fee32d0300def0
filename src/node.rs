//! Group and storage-node data model (spec §3).
//!
//! Peer records are kept in a flat arena indexed by a stable `PeerIndex`
//! rather than linked through `Rc`/`Arc` pointers to each other, per spec §9's
//! design note on cyclic structures: a group's peers all reference each
//! other (for replication fan-out) and an index-based arena sidesteps
//! reference cycles entirely, the same way the teacher keeps its export
//! table and mount list as flat, index-addressed `Vec`s rather than an
//! intrusive graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use whirlwind::ShardMap;

use crate::config::Config;

/// Lifecycle status of a peer storage node, mirrored from tracker
/// heartbeats (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Init,
    WaitSync,
    Syncing,
    Deleted,
    Offline,
    Online,
    Active,
    None,
    IpChanged,
    Recovery,
}

/// A stable handle into the peer arena. Never reused once issued, even if
/// the underlying slot is later marked `Deleted`, so that in-flight
/// replication readers holding an index never alias a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIndex(pub usize);

/// A peer storage node within this node's replication group (spec §3).
#[derive(Debug, Clone)]
pub struct StorageNode {
    pub server_id: String,
    pub addr: std::net::SocketAddr,
    pub status: NodeStatus,
    pub join_time: u32,
    pub sync_until_timestamp: u32,
}

struct PeerSlot {
    node: RwLock<StorageNode>,
}

/// This storage node's view of its own replication group: its own identity,
/// configuration, and the arena of peers it replicates to/from.
pub struct Node {
    pub config: Config,
    pub this_server_id: String,
    peers: RwLock<Vec<Arc<PeerSlot>>>,
    index_by_server_id: ShardMap<String, PeerIndex>,
    next_binlog_sequence: AtomicU64,
}

impl Node {
    pub fn new(config: Config) -> Self {
        let this_server_id = config.this_server_id.clone();
        Self {
            config,
            this_server_id,
            peers: RwLock::new(Vec::new()),
            index_by_server_id: ShardMap::new(),
            next_binlog_sequence: AtomicU64::new(0),
        }
    }

    /// Registers a new peer, or returns the existing index if already known.
    pub async fn register_peer(&self, node: StorageNode) -> PeerIndex {
        if let Some(existing) = self.index_by_server_id.get(&node.server_id).await {
            return *existing;
        }
        let mut peers = self.peers.write().await;
        let index = PeerIndex(peers.len());
        let server_id = node.server_id.clone();
        peers.push(Arc::new(PeerSlot { node: RwLock::new(node) }));
        self.index_by_server_id.insert(server_id, index).await;
        index
    }

    pub async fn peer_index(&self, server_id: &str) -> Option<PeerIndex> {
        self.index_by_server_id.get(server_id).await.map(|g| *g)
    }

    pub async fn peer(&self, index: PeerIndex) -> Option<StorageNode> {
        let peers = self.peers.read().await;
        let slot = peers.get(index.0)?.clone();
        drop(peers);
        Some(slot.node.read().await.clone())
    }

    pub async fn set_status(&self, index: PeerIndex, status: NodeStatus) {
        let peers = self.peers.read().await;
        if let Some(slot) = peers.get(index.0) {
            slot.node.write().await.status = status;
        }
    }

    /// Snapshots every currently known peer (spec §4.9 heartbeat reporting).
    pub async fn all_peers(&self) -> Vec<(PeerIndex, StorageNode)> {
        let peers = self.peers.read().await;
        let mut out = Vec::with_capacity(peers.len());
        for (i, slot) in peers.iter().enumerate() {
            out.push((PeerIndex(i), slot.node.read().await.clone()));
        }
        out
    }

    /// Hands out a process-unique sequence number for correlating a write
    /// with its binlog record across the async dispatcher and the
    /// synchronous disk worker that actually appends it.
    pub fn next_binlog_sequence(&self) -> u64 {
        self.next_binlog_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_config() -> Config {
        toml::from_str(
            r#"
            base_path = "/tmp/fdfs-test"
            group_name = "group1"
            this_server_id = "192.168.0.1"
            store_paths = [{ path = "/tmp/fdfs-test/data0" }]
            subdir_count_per_path = 4

            [reserved_space]
            kind = "ratio"
            ratio = 0.1

            [network]
            bind_addr = "127.0.0.1:23000"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn registering_same_peer_twice_reuses_index() {
        let node = Node::new(test_config());
        let peer = StorageNode {
            server_id: "192.168.0.2".into(),
            addr: "192.168.0.2:23000".parse().unwrap(),
            status: NodeStatus::Online,
            join_time: 0,
            sync_until_timestamp: 0,
        };
        let a = node.register_peer(peer.clone()).await;
        let b = node.register_peer(peer).await;
        assert_eq!(a, b);
        assert_eq!(node.all_peers().await.len(), 1);
    }

    #[tokio::test]
    async fn status_updates_are_visible_through_index() {
        let node = Node::new(test_config());
        let index = node
            .register_peer(StorageNode {
                server_id: "192.168.0.3".into(),
                addr: "192.168.0.3:23000".parse().unwrap(),
                status: NodeStatus::Init,
                join_time: 0,
                sync_until_timestamp: 0,
            })
            .await;
        node.set_status(index, NodeStatus::Active).await;
        assert_eq!(node.peer(index).await.unwrap().status, NodeStatus::Active);
    }
}
