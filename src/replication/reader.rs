//! Replication reader (spec §4.7): one task per peer, tailing this node's
//! binlog and forwarding each record as a sync-* command.
//!
//! File content is re-read from disk at send time rather than captured when
//! the binlog record was written (spec §9 design note): by the time a slow
//! or newly-recovered peer catches up, a file may have been modified or
//! appended to again, and replaying the *current* bytes for a later sync
//! record naturally subsumes whatever an earlier one would have sent.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::binlog::record::{OpType, Record};
use crate::binlog::SegmentReader;
use crate::disk::read::read_range;
use crate::replication::mark::ReplicationMark;

/// Abstraction over "send this sync-* command to the peer and get back its
/// status byte", so the polling/backoff loop below can be tested without a
/// real socket.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn send_sync(&self, op: OpType, timestamp: u32, filename: &str, payload: SyncPayload) -> std::io::Result<u8>;
}

#[derive(Debug, Clone)]
pub enum SyncPayload {
    None,
    Content(Vec<u8>),
    /// A modify's write offset alongside the current file content at that
    /// offset (spec §4.3, §4.7): the binlog's `extra` field carries the
    /// offset the source wrote at.
    ContentAt { offset: u64, data: Vec<u8> },
    Truncate { remain_size: u64 },
    Link { master_filename: String },
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct ReplicationReader<L: PeerLink> {
    binlog_dir: PathBuf,
    store_path: PathBuf,
    marks_dir: PathBuf,
    peer_server_id: String,
    link: L,
}

impl<L: PeerLink> ReplicationReader<L> {
    pub fn new(binlog_dir: PathBuf, store_path: PathBuf, marks_dir: PathBuf, peer_server_id: String, link: L) -> Self {
        Self { binlog_dir, store_path, marks_dir, peer_server_id, link }
    }

    /// Runs until `should_stop` signals shutdown. Exposed as a loop body
    /// (rather than spawning its own task) so callers control the tokio
    /// task boundary and can swap in a test clock/backoff.
    pub async fn run(&self, mut should_stop: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let mut mark = ReplicationMark::load(&self.marks_dir, &self.peer_server_id)?;
        let mut reader = SegmentReader::open(&self.binlog_dir, mark.binlog_index, mark.file_offset)?;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *should_stop.borrow() {
                return Ok(());
            }
            match reader.next() {
                Ok(Some(record)) => {
                    match self.forward(&record).await {
                        Ok(()) => {
                            backoff = INITIAL_BACKOFF;
                            mark.binlog_index = reader.segment();
                            mark.file_offset = reader.offset();
                            mark.sync_row_count += 1;
                            mark.save(&self.marks_dir, &self.peer_server_id)?;
                        }
                        Err(_) => {
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                Ok(None) => {
                    if reader.roll_forward()? {
                        continue;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                        _ = should_stop.changed() => {}
                    }
                }
                Err(_) => {
                    // A corrupt record blocks this peer's progress without
                    // poisoning the others; skip one line and keep going.
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn forward(&self, record: &Record) -> std::io::Result<()> {
        // Replica records are ops this node already applied on a peer's
        // behalf; re-forwarding them would bounce every mutation around the
        // group forever. Only source records get sent onward.
        if record.op.is_replica() {
            return Ok(());
        }
        let payload = match record.op {
            OpType::SourceCreateFile | OpType::SourceUpdateFile | OpType::SourceAppendFile => {
                let path = self.store_path.join(&record.filename);
                SyncPayload::Content(read_range(&path, 0, 0).unwrap_or_default())
            }
            OpType::SourceModifyFile => {
                let path = self.store_path.join(&record.filename);
                let offset: u64 = record.extra.as_deref().and_then(|e| e.parse().ok()).unwrap_or(0);
                let data = read_range(&path, offset, 0).unwrap_or_default();
                SyncPayload::ContentAt { offset, data }
            }
            OpType::SourceTruncateFile => {
                let remain_size = record.extra.as_deref().and_then(|e| e.parse().ok()).unwrap_or(0);
                SyncPayload::Truncate { remain_size }
            }
            OpType::SourceCreateLink => SyncPayload::Link { master_filename: record.extra.clone().unwrap_or_default() },
            OpType::SourceDeleteFile => SyncPayload::None,
            _ => SyncPayload::None,
        };
        let status = self.link.send_sync(record.op, record.timestamp, &record.filename, payload).await?;
        if status == 0 {
            Ok(())
        } else {
            Err(std::io::Error::new(std::io::ErrorKind::Other, format!("peer rejected with status {status}")))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binlog::BinlogWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerLink for CountingLink {
        async fn send_sync(&self, _op: OpType, _timestamp: u32, _filename: &str, _payload: SyncPayload) -> std::io::Result<u8> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn forwards_every_record_then_stops() {
        let binlog_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let marks_dir = tempfile::tempdir().unwrap();

        let writer = BinlogWriter::open(binlog_dir.path(), 1024 * 1024).unwrap();
        for i in 0..3 {
            writer
                .append(&Record {
                    timestamp: i,
                    op: OpType::SourceDeleteFile,
                    filename: format!("M00/00/00/f{i}.txt"),
                    extra: None,
                })
                .unwrap();
        }

        let count = Arc::new(AtomicUsize::new(0));
        let reader = ReplicationReader::new(
            binlog_dir.path().to_path_buf(),
            store_dir.path().to_path_buf(),
            marks_dir.path().to_path_buf(),
            "peer-1".to_string(),
            CountingLink { count: count.clone() },
        );

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let _ = reader.run(rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn skips_forwarding_replica_records() {
        let binlog_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let marks_dir = tempfile::tempdir().unwrap();

        let writer = BinlogWriter::open(binlog_dir.path(), 1024 * 1024).unwrap();
        writer
            .append(&Record {
                timestamp: 0,
                op: OpType::ReplicaDeleteFile,
                filename: "M00/00/00/f0.txt".to_string(),
                extra: None,
            })
            .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let reader = ReplicationReader::new(
            binlog_dir.path().to_path_buf(),
            store_dir.path().to_path_buf(),
            marks_dir.path().to_path_buf(),
            "peer-1".to_string(),
            CountingLink { count: count.clone() },
        );

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let _ = reader.run(rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
