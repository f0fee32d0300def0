//! Runtime counters and the heartbeat snapshot sent to the tracker
//! (spec §4.9, SPEC_FULL.md §F).

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the connection and disk-worker hot paths.
#[derive(Default)]
pub struct Counters {
    pub uploads: AtomicU64,
    pub downloads: AtomicU64,
    pub deletes: AtomicU64,
    pub appends: AtomicU64,
    pub modifies: AtomicU64,
    pub sync_in: AtomicU64,
    pub sync_out: AtomicU64,
    pub connections_accepted: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub disk_errors: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            appends: self.appends.load(Ordering::Relaxed),
            modifies: self.modifies.load(Ordering::Relaxed),
            sync_in: self.sync_in.load(Ordering::Relaxed),
            sync_out: self.sync_out.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            disk_errors: self.disk_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountersSnapshot {
    pub uploads: u64,
    pub downloads: u64,
    pub deletes: u64,
    pub appends: u64,
    pub modifies: u64,
    pub sync_in: u64,
    pub sync_out: u64,
    pub connections_accepted: u64,
    pub protocol_errors: u64,
    pub disk_errors: u64,
}

/// Per-store-path disk usage reported alongside the counters (spec §4.9).
#[derive(Debug, Clone)]
pub struct StorePathStats {
    pub index: u8,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// The full heartbeat payload sent to the tracker on its configured
/// interval (spec §4.9).
#[derive(Debug, Clone)]
pub struct HeartbeatSnapshot {
    pub server_id: String,
    pub counters: CountersSnapshot,
    pub store_paths: Vec<StorePathStats>,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = Counters::default();
        Counters::bump(&counters.uploads);
        Counters::bump(&counters.uploads);
        Counters::bump(&counters.downloads);
        let snap = counters.snapshot();
        assert_eq!(snap.uploads, 2);
        assert_eq!(snap.downloads, 1);
        assert_eq!(snap.deletes, 0);
    }
}
