//! Per-peer replication mark (spec §4.7): a persisted cursor recording how
//! far this node has replicated its binlog to one specific peer, so a
//! restart resumes instead of re-sending (or silently skipping) history.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationMark {
    pub binlog_index: u64,
    pub file_offset: u64,
    pub until_timestamp: u32,
    pub scan_row_count: u64,
    pub sync_row_count: u64,
    /// Whether this peer needs the one-time catch-up pass over files that
    /// existed before it joined the group (spec §4.7 bootstrap).
    pub need_sync_old: bool,
    pub sync_old_done: bool,
}

impl Default for ReplicationMark {
    fn default() -> Self {
        Self {
            binlog_index: 0,
            file_offset: 0,
            until_timestamp: 0,
            scan_row_count: 0,
            sync_row_count: 0,
            need_sync_old: true,
            sync_old_done: false,
        }
    }
}

pub fn mark_path(dir: &Path, peer_server_id: &str) -> PathBuf {
    dir.join(format!("{peer_server_id}.mark"))
}

impl ReplicationMark {
    pub fn load(dir: &Path, peer_server_id: &str) -> io::Result<Self> {
        let path = mark_path(dir, peer_server_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Persists the mark atomically, the same temp-file-then-rename pattern
    /// used for metadata sidecars and the binlog index.
    pub fn save(&self, dir: &Path, peer_server_id: &str) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = mark_path(dir, peer_server_id);
        let tmp = path.with_extension("mark.tmp");
        let text = toml::to_string(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut mark = ReplicationMark::default();
        mark.binlog_index = 3;
        mark.file_offset = 128;
        mark.sync_old_done = true;
        mark.save(dir.path(), "peer-1").unwrap();

        let loaded = ReplicationMark::load(dir.path(), "peer-1").unwrap();
        assert_eq!(loaded, mark);
    }

    #[test]
    fn missing_mark_defaults_to_needing_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ReplicationMark::load(dir.path(), "never-seen").unwrap();
        assert!(loaded.need_sync_old);
        assert!(!loaded.sync_old_done);
    }
}
