//! Storage node binary entrypoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fastdfs_storage::buffer::BufferPool;
use fastdfs_storage::config::Config;
use fastdfs_storage::disk::DiskWorkerPool;
use fastdfs_storage::dispatch::{Dispatcher, StorePathRoute};
use fastdfs_storage::net::connection::ConnectionConfig;
use fastdfs_storage::node::Node;
use fastdfs_storage::replication::{ReplicationReader, TcpPeerLink};
use fastdfs_storage::stats::{Counters, HeartbeatSnapshot, StorePathStats};
use fastdfs_storage::storepath::StorePathChooser;
use fastdfs_storage::tracker::{TcpTracker, Tracker};
use fastdfs_storage::trunk::TrunkStore;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fdfs-storaged", about = "FastDFS-style storage node")]
struct Args {
    /// Path to the node's TOML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(group = %config.group_name, server_id = %config.this_server_id, "starting storage node");

    let node = Arc::new(Node::new(config.clone()));
    let counters = Arc::new(Counters::default());

    let mut routes = Vec::new();
    for (i, store_path) in config.store_paths.iter().enumerate() {
        let trunk = if config.trunk.enabled {
            Some(Arc::new(TrunkStore::open(&store_path.path, config.trunk.trunk_file_size)?))
        } else {
            None
        };
        let pool = DiskWorkerPool::spawn_with_trunk(store_path.path.clone(), &config.disk_workers, trunk.clone());
        let binlog_dir = store_path.path.join("binlog");
        let binlog = Arc::new(fastdfs_storage::binlog::BinlogWriter::open(
            &binlog_dir,
            config.binlog.rotation_bytes,
        )?);
        info!(index = i, path = %store_path.path.display(), trunk = trunk.is_some(), "store path ready");
        routes.push(StorePathRoute { pool, binlog, trunk });
    }

    let chooser = StorePathChooser::new(
        config.store_paths.clone(),
        config.store_path_policy,
        config.reserved_space.clone(),
    );

    let dispatcher = Arc::new(Dispatcher::new(node.clone(), routes, chooser, counters.clone()));

    // Kept alive for the process lifetime so the replication readers'
    // `should_stop` receivers never see a dropped sender and spin; nothing
    // currently triggers a graceful shutdown.
    let mut shutdown_txs = Vec::new();

    if !config.tracker_servers.is_empty() {
        let tracker = Arc::new(TcpTracker::new(config.tracker_servers.clone()));
        match tracker.register(&config.this_server_id, &config.group_name).await {
            Ok(membership) => {
                for peer in membership.nodes {
                    if peer.server_id != config.this_server_id {
                        node.register_peer(peer).await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to register with tracker at startup"),
        }
        spawn_heartbeat_loop(node.clone(), counters.clone(), config.clone(), tracker);
    }

    for store_path in &config.store_paths {
        let binlog_dir = store_path.path.join("binlog");
        let marks_dir = store_path.path.join("sync");
        for peer_addr in &config.peer_servers {
            let link = TcpPeerLink::new(*peer_addr);
            let reader = ReplicationReader::new(
                binlog_dir.clone(),
                store_path.path.clone(),
                marks_dir.clone(),
                peer_addr.to_string(),
                link,
            );
            let (tx, rx) = tokio::sync::watch::channel(false);
            shutdown_txs.push(tx);
            let peer_addr = *peer_addr;
            tokio::spawn(async move {
                if let Err(e) = reader.run(rx).await {
                    warn!(%peer_addr, error = %e, "replication reader exited");
                }
            });
        }
    }

    let buffers = BufferPool::new(config.network.worker_count * 4, config.network.task_buffer_size);
    let connection_config = Arc::new(ConnectionConfig {
        idle_timeout: config.network.idle_timeout,
        io_timeout: config.network.io_timeout,
    });

    fastdfs_storage::net::listener::run(config.network.bind_addr, dispatcher, buffers, connection_config).await?;
    drop(shutdown_txs);
    Ok(())
}

/// Reports counters and per-path disk usage to the tracker on
/// `config.heartbeat_interval`, reconciling the membership it hands back
/// into this node's peer registry (spec §4.9).
fn spawn_heartbeat_loop(node: Arc<Node>, counters: Arc<Counters>, config: Config, tracker: Arc<TcpTracker>) {
    tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(config.heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; register() already ran at startup
        loop {
            ticker.tick().await;
            let store_paths = config
                .store_paths
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let (total_bytes, free_bytes) = path_disk_usage(&p.path);
                    StorePathStats { index: i as u8, total_bytes, free_bytes }
                })
                .collect();
            let snapshot = HeartbeatSnapshot {
                server_id: config.this_server_id.clone(),
                counters: counters.snapshot(),
                store_paths,
                uptime_secs: started.elapsed().as_secs(),
            };
            match tracker.heartbeat(snapshot).await {
                Ok(membership) => {
                    for peer in membership.nodes {
                        if peer.server_id == config.this_server_id {
                            continue;
                        }
                        let status = peer.status;
                        let index = node.register_peer(peer).await;
                        node.set_status(index, status).await;
                    }
                }
                Err(e) => warn!(error = %e, "heartbeat to tracker failed"),
            }
        }
    });
}

/// `(total_bytes, free_bytes)` for a store path. A real deployment statfs's
/// the mount; kept as a narrow placeholder (mirroring
/// [`fastdfs_storage::dispatch`]'s own store-path chooser stub) until a
/// filesystem-stats crate is pulled in.
fn path_disk_usage(_path: &std::path::Path) -> (u64, u64) {
    (u64::MAX, u64::MAX)
}
