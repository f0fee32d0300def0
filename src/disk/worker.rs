//! Disk worker pool (spec §3, §4.2).
//!
//! Network I/O runs entirely on the tokio reactor; disk I/O runs on a fixed
//! pool of plain OS threads that block on ordinary `std::fs` calls. The two
//! sides meet at an `async_channel`, which (unlike `tokio::sync::mpsc`)
//! supports a genuinely blocking `recv_blocking` on the worker side and an
//! async `send` on the dispatcher side — so neither side has to poll a
//! channel it can't naturally wait on.
//!
//! One pool is created per store path, with separate read and write worker
//! counts, since read and write traffic have very different queuing
//! behavior under load (spec §4.2: "reads and writes must not starve each
//! other on the same path").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::DiskWorkerConfig;
use crate::disk::fileop::{FileOpContext, FileOpKind, FileOpOutcome};
use crate::disk::{append, link, modify, read, truncate, write};
use crate::error::{DiskError, StorageError, StorageResult};
use crate::metadata;
use crate::storepath::fanout_dir;
use crate::trunk::TrunkStore;

pub struct Job {
    pub ctx: FileOpContext,
    pub reply: oneshot::Sender<StorageResult<FileOpOutcome>>,
}

/// One store path's read and write queues, each backed by its own worker
/// threads.
pub struct DiskWorkerPool {
    base_path: PathBuf,
    read_tx: async_channel::Sender<Job>,
    write_tx: async_channel::Sender<Job>,
    _read_handles: Vec<std::thread::JoinHandle<()>>,
    _write_handles: Vec<std::thread::JoinHandle<()>>,
}

impl DiskWorkerPool {
    pub fn spawn(base_path: PathBuf, config: &DiskWorkerConfig) -> Arc<Self> {
        Self::spawn_with_trunk(base_path, config, None)
    }

    /// Same as [`Self::spawn`], but gives every worker thread a handle to
    /// this path's trunk store so `WriteTrunk` jobs can reserve and write a
    /// chunk instead of failing (spec §4.5 is only wired when trunking is
    /// enabled for this path).
    pub fn spawn_with_trunk(
        base_path: PathBuf,
        config: &DiskWorkerConfig,
        trunk: Option<Arc<TrunkStore>>,
    ) -> Arc<Self> {
        let (read_tx, read_rx) = async_channel::bounded::<Job>(config.queue_depth);
        let (write_tx, write_rx) = async_channel::bounded::<Job>(config.queue_depth);

        let mut read_handles = Vec::new();
        for i in 0..config.read_workers_per_path {
            let rx = read_rx.clone();
            let base = base_path.clone();
            let trunk = trunk.clone();
            read_handles.push(
                std::thread::Builder::new()
                    .name(format!("fdfs-disk-read-{i}"))
                    .spawn(move || worker_loop(rx, base, trunk))
                    .expect("spawning disk worker thread"),
            );
        }

        let mut write_handles = Vec::new();
        for i in 0..config.write_workers_per_path {
            let rx = write_rx.clone();
            let base = base_path.clone();
            let trunk = trunk.clone();
            write_handles.push(
                std::thread::Builder::new()
                    .name(format!("fdfs-disk-write-{i}"))
                    .spawn(move || worker_loop(rx, base, trunk))
                    .expect("spawning disk worker thread"),
            );
        }

        Arc::new(Self {
            base_path,
            read_tx,
            write_tx,
            _read_handles: read_handles,
            _write_handles: write_handles,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn submit_read(&self, ctx: FileOpContext) -> StorageResult<FileOpOutcome> {
        self.submit(&self.read_tx, ctx).await
    }

    pub async fn submit_write(&self, ctx: FileOpContext) -> StorageResult<FileOpOutcome> {
        self.submit(&self.write_tx, ctx).await
    }

    async fn submit(
        &self,
        tx: &async_channel::Sender<Job>,
        ctx: FileOpContext,
    ) -> StorageResult<FileOpOutcome> {
        let (reply, recv) = oneshot::channel();
        tx.send(Job { ctx, reply }).await.map_err(|_| StorageError::QueueFull)?;
        recv.await.map_err(|_| StorageError::QueueFull)?
    }
}

fn worker_loop(rx: async_channel::Receiver<Job>, base_path: PathBuf, trunk: Option<Arc<TrunkStore>>) {
    while let Ok(job) = rx.recv_blocking() {
        let outcome = execute(&base_path, trunk.as_deref(), &job.ctx);
        let _ = job.reply.send(outcome);
    }
}

/// Resolves a logical filename to an on-disk path and runs the
/// corresponding blocking algorithm. Filenames are parsed by the dispatcher
/// before a job is submitted; by the time a job reaches a worker, its
/// on-disk location is just `<base>/<logical filename>`.
fn execute(base_path: &Path, trunk: Option<&TrunkStore>, ctx: &FileOpContext) -> StorageResult<FileOpOutcome> {
    let path = base_path.join(&ctx.logical_filename);
    match &ctx.kind {
        FileOpKind::WriteNew { data, .. } | FileOpKind::WriteSlave { data, .. } => {
            let outcome = write::write_new(&path, data)?;
            Ok(FileOpOutcome::Wrote { crc32: outcome.crc32, size: data.len() as u64 })
        }
        FileOpKind::WriteTrunk { ext, data } => {
            let trunk = trunk.ok_or(StorageError::InvalidArgument("trunking not enabled for this store path"))?;
            let crc32 = write::crc32(data);
            let outcome = trunk.write_member(data, ext, crc32)?;
            Ok(FileOpOutcome::WroteTrunk {
                crc32,
                size: outcome.size,
                trunk_id: outcome.trunk_id,
                offset: outcome.offset,
            })
        }
        FileOpKind::CreateLink { master_filename } => {
            let master_path = base_path.join(master_filename);
            link::create_link(&path, &master_path)?;
            Ok(FileOpOutcome::LinkCreated { master_filename: master_filename.clone() })
        }
        FileOpKind::Read { offset, length } => {
            let data = read::read_range(&path, *offset, *length)?;
            Ok(FileOpOutcome::Read { data })
        }
        FileOpKind::ReadTrunk { trunk_id, offset, size } => {
            let trunk = trunk.ok_or(StorageError::InvalidArgument("trunking not enabled for this store path"))?;
            let data = trunk.read_member(*offset, *size)?;
            let _ = trunk_id;
            Ok(FileOpOutcome::Read { data })
        }
        FileOpKind::DeleteTrunk { trunk_id, offset } => {
            let trunk = trunk.ok_or(StorageError::InvalidArgument("trunking not enabled for this store path"))?;
            trunk.free_member(*trunk_id, *offset)?;
            Ok(FileOpOutcome::Deleted)
        }
        FileOpKind::Append { data } => {
            let outcome = append::append(&path, data)?;
            Ok(FileOpOutcome::Appended { new_size: outcome.new_size })
        }
        FileOpKind::Modify { offset, data } => {
            modify::modify(&path, *offset, data)?;
            Ok(FileOpOutcome::Modified { offset: *offset })
        }
        FileOpKind::Truncate { remain_size } => {
            truncate::truncate(&path, *remain_size)?;
            Ok(FileOpOutcome::Truncated { remain_size: *remain_size })
        }
        FileOpKind::Delete => {
            link::delete_link_aware(&path)?;
            Ok(FileOpOutcome::Deleted)
        }
        FileOpKind::SetMetadata { meta_bytes, overwrite } => {
            let mode = if *overwrite { metadata::MergeMode::Overwrite } else { metadata::MergeMode::Merge };
            let incoming = metadata::decode(meta_bytes);
            metadata::apply(&path, &incoming, mode).map_err(|e| {
                StorageError::Disk(DiskError::Write { path: path.clone(), source: e })
            })?;
            Ok(FileOpOutcome::MetadataSet)
        }
        FileOpKind::GetMetadata => {
            let meta = metadata::read(&path)
                .map_err(|e| StorageError::Disk(DiskError::Read { path: path.clone(), source: e }))?;
            Ok(FileOpOutcome::MetadataRead { bytes: metadata::encode(&meta) })
        }
    }
}

/// Ensures the two-level fan-out directory for a freshly chosen filename
/// exists before a write job is submitted, so workers never race each other
/// creating the same directory.
pub fn ensure_fanout_dir(base_path: &Path, dir_high: u8, dir_low: u8) -> Result<(), DiskError> {
    let dir = fanout_dir(base_path, dir_high, dir_low);
    std::fs::create_dir_all(&dir).map_err(|e| DiskError::Open { path: dir, source: e })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::fileop::Origin;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DiskWorkerPool::spawn(
            dir.path().to_path_buf(),
            &DiskWorkerConfig { read_workers_per_path: 1, write_workers_per_path: 1, queue_depth: 16 },
        );

        let write_ctx = FileOpContext {
            store_path_index: 0,
            logical_filename: "M00/00/00/abc.txt".to_string(),
            kind: FileOpKind::WriteNew { ext: "txt".to_string(), data: b"hello".to_vec() },
            origin: Origin::Local,
        };
        let outcome = pool.submit_write(write_ctx).await.unwrap();
        assert!(matches!(outcome, FileOpOutcome::Wrote { .. }));

        let read_ctx = FileOpContext {
            store_path_index: 0,
            logical_filename: "M00/00/00/abc.txt".to_string(),
            kind: FileOpKind::Read { offset: 0, length: 0 },
            origin: Origin::Local,
        };
        let FileOpOutcome::Read { data } = pool.submit_read(read_ctx).await.unwrap() else {
            panic!("expected Read outcome");
        };
        assert_eq!(data, b"hello");
    }
}
