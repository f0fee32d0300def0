//! Wires the free-space allocator and the trunk binlog to an actual trunk
//! file on disk (spec §4.5): reserve a chunk, write a header-prefixed
//! payload into it, confirm the reservation, and log every step so a crash
//! mid-write can be rebuilt by replaying the trunk binlog instead of
//! re-scanning the trunk file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DiskError, TrunkError};
use crate::trunk::allocator::{ChunkKey, TrunkAllocator};
use crate::trunk::binlog::{TrunkBinlog, TrunkBinlogRecord, TrunkEvent};
use crate::trunk::file::{AllocStatus, ChunkHeader, CHUNK_HEADER_LEN};

/// The only trunk file this store manages. Real deployments roll over to a
/// fresh trunk file once one fills; one pre-sized file per store path is
/// enough to exercise the allocator and binlog end to end.
const TRUNK_ID: u64 = 0;

pub struct TrunkWriteOutcome {
    pub trunk_id: u64,
    pub offset: u64,
    pub size: u64,
}

pub struct TrunkStore {
    trunk_path: PathBuf,
    file: Mutex<File>,
    allocator: TrunkAllocator,
    binlog: TrunkBinlog,
}

impl TrunkStore {
    /// Opens (creating and pre-sizing if necessary) the trunk file and its
    /// binlog under `base_path`, replaying the binlog to rebuild the
    /// allocator's free-space tree.
    pub fn open(base_path: &Path, trunk_file_size: u64) -> Result<Self, TrunkError> {
        let trunk_dir = base_path.join("trunk");
        std::fs::create_dir_all(&trunk_dir)
            .map_err(|e| DiskError::Open { path: trunk_dir.clone(), source: e })?;
        let trunk_path = trunk_dir.join("000");
        let binlog_path = trunk_dir.join("binlog");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&trunk_path)
            .map_err(|e| DiskError::Open { path: trunk_path.clone(), source: e })?;
        let current_len = file
            .metadata()
            .map_err(|e| DiskError::Stat { path: trunk_path.clone(), source: e })?
            .len();
        if current_len < trunk_file_size {
            file.set_len(trunk_file_size)
                .map_err(|e| DiskError::Truncate { path: trunk_path.clone(), source: e })?;
        }

        let allocator = TrunkAllocator::new();
        let records = TrunkBinlog::replay(&binlog_path)?;
        let binlog = TrunkBinlog::open(&binlog_path)?;
        allocator.add_trunk(TRUNK_ID, trunk_file_size);
        for record in &records {
            match record.event {
                TrunkEvent::Alloc => {
                    let _ = allocator.reserve_at(record.trunk_id, record.offset, record.size);
                }
                TrunkEvent::Confirm => {
                    let _ = allocator.confirm(record.key());
                }
                TrunkEvent::Free => {
                    let _ = allocator.free(record.key());
                }
            }
        }

        Ok(Self { trunk_path, file: Mutex::new(file), allocator, binlog })
    }

    /// Reserves a chunk, writes `data` behind a [`ChunkHeader`], confirms
    /// the reservation and logs both events. On any failure the reservation
    /// is cancelled so the space is available to the next writer.
    pub fn write_member(&self, data: &[u8], ext: &str, crc32: u32) -> Result<TrunkWriteOutcome, TrunkError> {
        let total = CHUNK_HEADER_LEN + data.len() as u64;
        let key = self.allocator.reserve(total)?;

        if let Err(e) = self.write_chunk(key, data, ext, crc32) {
            let _ = self.allocator.cancel(key);
            return Err(e);
        }

        self.binlog.append(&TrunkBinlogRecord {
            event: TrunkEvent::Alloc,
            trunk_id: key.trunk_id,
            offset: key.offset,
            size: total,
        })?;
        self.allocator.confirm(key)?;
        self.binlog.append(&TrunkBinlogRecord {
            event: TrunkEvent::Confirm,
            trunk_id: key.trunk_id,
            offset: key.offset,
            size: total,
        })?;

        Ok(TrunkWriteOutcome { trunk_id: key.trunk_id, offset: key.offset, size: data.len() as u64 })
    }

    fn write_chunk(&self, key: ChunkKey, data: &[u8], ext: &str, crc32: u32) -> Result<(), TrunkError> {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let header =
            ChunkHeader { status: AllocStatus::Used, size: data.len() as u64, crc32, mtime, ext: ext.to_string() };

        let mut buf = Vec::with_capacity(CHUNK_HEADER_LEN as usize + data.len());
        header.write(&mut buf).map_err(|e| DiskError::Write { path: self.trunk_path.clone(), source: e })?;
        buf.extend_from_slice(data);

        let mut file = self.file.lock().expect("trunk file mutex poisoned");
        file.seek(SeekFrom::Start(key.offset))
            .map_err(|e| DiskError::Seek { path: self.trunk_path.clone(), source: e })?;
        file.write_all(&buf).map_err(|e| DiskError::Write { path: self.trunk_path.clone(), source: e })?;
        file.sync_data().map_err(|e| DiskError::Fsync { path: self.trunk_path.clone(), source: e })?;
        Ok(())
    }

    /// Reads a member's payload back out, skipping its chunk header.
    pub fn read_member(&self, offset: u64, size: u64) -> Result<Vec<u8>, DiskError> {
        let mut file = self.file.lock().expect("trunk file mutex poisoned");
        file.seek(SeekFrom::Start(offset + CHUNK_HEADER_LEN))
            .map_err(|e| DiskError::Seek { path: self.trunk_path.clone(), source: e })?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).map_err(|e| DiskError::Read { path: self.trunk_path.clone(), source: e })?;
        Ok(buf)
    }

    /// Returns a chunk to the free tree, marks its on-disk header free, and
    /// logs the event.
    pub fn free_member(&self, trunk_id: u64, offset: u64) -> Result<(), TrunkError> {
        let key = ChunkKey { trunk_id, offset };
        self.allocator.free(key)?;
        self.binlog.append(&TrunkBinlogRecord { event: TrunkEvent::Free, trunk_id, offset, size: 0 })?;

        let mut file = self.file.lock().expect("trunk file mutex poisoned");
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| DiskError::Seek { path: self.trunk_path.clone(), source: e })?;
        file.write_all(&[0u8]).map_err(|e| DiskError::Write { path: self.trunk_path.clone(), source: e })?;
        Ok(())
    }

    /// Reserves raw space without writing to it, for the `TRUNK_ALLOC`
    /// management command (spec §4.5's allocation handshake, scoped to this
    /// node's own local allocator).
    pub fn reserve_space(&self, size: u64) -> Result<ChunkKey, TrunkError> {
        let key = self.allocator.reserve(size)?;
        self.binlog.append(&TrunkBinlogRecord {
            event: TrunkEvent::Alloc,
            trunk_id: key.trunk_id,
            offset: key.offset,
            size,
        })?;
        Ok(key)
    }

    pub fn confirm_space(&self, trunk_id: u64, offset: u64) -> Result<(), TrunkError> {
        let key = ChunkKey { trunk_id, offset };
        self.allocator.confirm(key)?;
        self.binlog.append(&TrunkBinlogRecord { event: TrunkEvent::Confirm, trunk_id, offset, size: 0 })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_then_reads_a_member() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrunkStore::open(dir.path(), 4096).unwrap();
        let outcome = store.write_member(b"hello", "txt", 0xDEAD_BEEF).unwrap();
        let data = store.read_member(outcome.offset, outcome.size).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn freed_member_space_is_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrunkStore::open(dir.path(), 4096).unwrap();
        let first = store.write_member(b"hello", "txt", 1).unwrap();
        store.free_member(first.trunk_id, first.offset).unwrap();
        let second = store.write_member(b"world", "txt", 2).unwrap();
        assert_eq!(second.offset, first.offset);
    }

    #[test]
    fn recovers_allocator_state_from_binlog_replay() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = {
            let store = TrunkStore::open(dir.path(), 4096).unwrap();
            store.write_member(b"payload", "jpg", 42).unwrap()
        };
        let reopened = TrunkStore::open(dir.path(), 4096).unwrap();
        // The reserved range should not be handed out again to a fresh
        // write of similar size landing at the same offset.
        let second = reopened.write_member(b"other", "jpg", 7).unwrap();
        assert_ne!(second.offset, outcome.offset);
    }
}
