//! Outbound connection pool to the tracker and to peer storage nodes
//! (spec §4.9, SPEC_FULL.md §D).
//!
//! Replication readers and the heartbeat task both need a TCP stream to a
//! given peer address without paying a fresh handshake every time, but a
//! peer that drops out of the group should have its idle connections reaped
//! rather than held open forever. `moka`'s time-to-idle eviction does exactly
//! that bookkeeping so this module doesn't have to run its own sweep timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// A pooled connection. `Clone` is cheap (it's an `Arc` around the actual
/// stream); callers lock the inner mutex for the duration of one request.
#[derive(Clone)]
pub struct PooledConnection {
    inner: Arc<Mutex<TcpStream>>,
}

impl PooledConnection {
    pub fn stream(&self) -> Arc<Mutex<TcpStream>> {
        self.inner.clone()
    }
}

/// Keyed by peer address; entries are evicted after sitting idle past
/// `idle_timeout` (spec §4.9: "pooled peer connections are recycled after an
/// idle period").
pub struct ConnectionPool {
    cache: Cache<SocketAddr, PooledConnection>,
}

impl ConnectionPool {
    pub fn new(max_connections: u64, idle_timeout: Duration) -> Self {
        let cache = Cache::builder().max_capacity(max_connections).time_to_idle(idle_timeout).build();
        Self { cache }
    }

    /// Returns a pooled connection for `addr`, dialing a fresh one if none is
    /// cached or the cached one has gone stale.
    pub async fn get(&self, addr: SocketAddr) -> std::io::Result<PooledConnection> {
        if let Some(conn) = self.cache.get(&addr) {
            return Ok(conn);
        }
        let stream = TcpStream::connect(addr).await?;
        let conn = PooledConnection { inner: Arc::new(Mutex::new(stream)) };
        self.cache.insert(addr, conn.clone());
        Ok(conn)
    }

    /// Drops a connection from the pool outright, e.g. after an I/O error
    /// that makes the stream unusable.
    pub fn evict(&self, addr: &SocketAddr) {
        self.cache.invalidate(addr);
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
