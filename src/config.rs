//! Node configuration (spec §6 Environment, SPEC_FULL.md §D).
//!
//! Read once at startup from a TOML file whose path is the node's sole
//! command-line argument. Parsing lives here rather than being treated as an
//! external collaborator because, unlike the tracker or the duplicate-index,
//! there is no meaningful "core" without it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// How a store path is picked for a new regular upload (spec §4.10).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorePathPolicy {
    RoundRobin,
    LoadBalance,
}

/// The four reserved-space variants of spec §4.10.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReservedSpacePolicy {
    AbsoluteMb { reserved_mb: u64 },
    Ratio { ratio: f64 },
    AbsoluteWithFallback { reserved_mb: u64 },
    RatioPerPath { ratio: f64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorePathConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub bind_addr: SocketAddr,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_task_buffer_size")]
    pub task_buffer_size: usize,
    #[serde(default = "default_idle_timeout_secs", with = "duration_secs")]
    pub idle_timeout: Duration,
    #[serde(default = "default_io_timeout_secs", with = "duration_secs")]
    pub io_timeout: Duration,
}

fn default_worker_count() -> usize {
    4
}
fn default_task_buffer_size() -> usize {
    256 * 1024
}
fn default_idle_timeout_secs() -> Duration {
    Duration::from_secs(900)
}
fn default_io_timeout_secs() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskWorkerConfig {
    #[serde(default = "default_read_workers")]
    pub read_workers_per_path: usize,
    #[serde(default = "default_write_workers")]
    pub write_workers_per_path: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_read_workers() -> usize {
    2
}
fn default_write_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrunkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_trunk_file_size")]
    pub trunk_file_size: u64,
    #[serde(default)]
    pub is_trunk_server: bool,
    /// Uploads at or under this size are packed into a trunk chunk instead
    /// of becoming a standalone file, when trunking is enabled (spec §4.5).
    #[serde(default = "default_small_file_threshold")]
    pub small_file_threshold: u64,
}

fn default_trunk_file_size() -> u64 {
    64 * 1024 * 1024
}

fn default_small_file_threshold() -> u64 {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinlogConfig {
    #[serde(default = "default_rotation_bytes")]
    pub rotation_bytes: u64,
}

fn default_rotation_bytes() -> u64 {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub base_path: PathBuf,
    pub group_name: String,
    pub this_server_id: String,
    pub store_paths: Vec<StorePathConfig>,
    #[serde(default = "default_store_path_policy")]
    pub store_path_policy: StorePathPolicy,
    pub reserved_space: ReservedSpacePolicy,
    #[serde(default = "default_subdir_count")]
    pub subdir_count_per_path: u32,
    pub network: NetworkConfig,
    #[serde(default)]
    pub disk_workers: DiskWorkerConfig,
    #[serde(default)]
    pub trunk: TrunkConfig,
    #[serde(default)]
    pub binlog: BinlogConfig,
    #[serde(default)]
    pub tracker_servers: Vec<SocketAddr>,
    #[serde(default)]
    pub peer_servers: Vec<SocketAddr>,
    #[serde(default = "default_heartbeat_interval_secs", with = "duration_secs")]
    pub heartbeat_interval: Duration,
}

fn default_heartbeat_interval_secs() -> Duration {
    Duration::from_secs(30)
}

fn default_store_path_policy() -> StorePathPolicy {
    StorePathPolicy::RoundRobin
}
fn default_subdir_count() -> u32 {
    256
}

impl Default for DiskWorkerConfig {
    fn default() -> Self {
        Self {
            read_workers_per_path: default_read_workers(),
            write_workers_per_path: default_write_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for TrunkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trunk_file_size: default_trunk_file_size(),
            is_trunk_server: false,
            small_file_threshold: default_small_file_threshold(),
        }
    }
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self { rotation_bytes: default_rotation_bytes() }
    }
}

impl Config {
    /// Loads and parses the TOML config at `path` (spec §6 Environment).
    pub fn load(path: &std::path::Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(config)
    }
}
