//! Trunk free-space allocator (spec §4.5).
//!
//! Tracks every chunk (free, reserved, or used) across all trunk files as an
//! in-memory index so allocation never has to scan a trunk file itself.
//! Reservation is a two-phase commit: `reserve` carves a chunk out of the
//! free tree and marks it reserved, `confirm` finalizes it once the data has
//! actually been written, and an unconfirmed reservation can be rolled back
//! with `cancel` (e.g. the write failed partway through). `free` returns a
//! used chunk to the free tree and coalesces it with adjacent free
//! neighbors in the same trunk, the way a general-purpose heap allocator
//! would, to keep fragmentation from accumulating one small file at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::TrunkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Free,
    Reserved,
    Used,
}

#[derive(Debug, Clone, Copy)]
struct ChunkRecord {
    size: u64,
    status: Status,
}

/// Where a chunk lives: which trunk file, and its byte offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkKey {
    pub trunk_id: u64,
    pub offset: u64,
}

struct Inner {
    chunks: BTreeMap<ChunkKey, ChunkRecord>,
    free_by_size: BTreeMap<u64, BTreeSet<ChunkKey>>,
}

impl Inner {
    fn insert_free(&mut self, key: ChunkKey, size: u64) {
        self.chunks.insert(key, ChunkRecord { size, status: Status::Free });
        self.free_by_size.entry(size).or_default().insert(key);
    }

    fn remove_from_free_index(&mut self, key: ChunkKey, size: u64) {
        if let Some(set) = self.free_by_size.get_mut(&size) {
            set.remove(&key);
            if set.is_empty() {
                self.free_by_size.remove(&size);
            }
        }
    }
}

/// Indexes every chunk across all trunk files by size (for best-fit lookup)
/// and by `(trunk_id, offset)` (for coalescing and confirm/free).
pub struct TrunkAllocator {
    inner: Mutex<Inner>,
}

impl TrunkAllocator {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { chunks: BTreeMap::new(), free_by_size: BTreeMap::new() }) }
    }

    /// Registers a brand-new trunk file as one large free chunk.
    pub fn add_trunk(&self, trunk_id: u64, total_size: u64) {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        inner.insert_free(ChunkKey { trunk_id, offset: 0 }, total_size);
    }

    /// Best-fit reservation: the smallest free chunk at least `requested`
    /// bytes, split if it's larger than needed.
    pub fn reserve(&self, requested: u64) -> Result<ChunkKey, TrunkError> {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        let candidate = inner
            .free_by_size
            .range(requested..)
            .next()
            .and_then(|(size, keys)| keys.iter().next().map(|k| (*size, *k)));
        let (size, key) = candidate.ok_or(TrunkError::NoSpace { requested })?;

        inner.remove_from_free_index(key, size);
        inner.chunks.insert(key, ChunkRecord { size: requested, status: Status::Reserved });

        if size > requested {
            let leftover_key = ChunkKey { trunk_id: key.trunk_id, offset: key.offset + requested };
            inner.insert_free(leftover_key, size - requested);
        }
        Ok(key)
    }

    pub fn confirm(&self, key: ChunkKey) -> Result<(), TrunkError> {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        match inner.chunks.get_mut(&key) {
            Some(record) if record.status == Status::Reserved => {
                record.status = Status::Used;
                Ok(())
            }
            _ => Err(TrunkError::NotReserved { trunk_id: key.trunk_id, offset: key.offset }),
        }
    }

    /// Rolls back a reservation that was never confirmed, returning it to
    /// the free tree (without attempting to coalesce — a failed write
    /// doesn't necessarily leave the leftover split chunk adjacent and free
    /// by the time this runs, so a later `free` call on a true neighbor
    /// handles coalescing instead).
    pub fn cancel(&self, key: ChunkKey) -> Result<(), TrunkError> {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        match inner.chunks.get(&key).copied() {
            Some(record) if record.status == Status::Reserved => {
                inner.insert_free(key, record.size);
                Ok(())
            }
            _ => Err(TrunkError::NotReserved { trunk_id: key.trunk_id, offset: key.offset }),
        }
    }

    /// Reconstructs a historical reservation at an exact offset, used only
    /// when replaying the trunk binlog at startup: splits whichever free
    /// chunk currently contains `offset` the same way `reserve` would, but
    /// located by position instead of by best-fit size (recovery must land
    /// on the same offset the original allocation used).
    pub fn reserve_at(&self, trunk_id: u64, offset: u64, size: u64) -> Result<ChunkKey, TrunkError> {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        let containing = inner
            .chunks
            .range(..=ChunkKey { trunk_id, offset })
            .rev()
            .find(|(k, r)| k.trunk_id == trunk_id && r.status == Status::Free && k.offset + r.size > offset)
            .map(|(k, r)| (*k, r.size));

        let (free_key, free_size) = containing.ok_or(TrunkError::NoSpace { requested: size })?;
        inner.remove_from_free_index(free_key, free_size);
        inner.chunks.remove(&free_key);

        if free_key.offset < offset {
            inner.insert_free(free_key, offset - free_key.offset);
        }
        let key = ChunkKey { trunk_id, offset };
        inner.chunks.insert(key, ChunkRecord { size, status: Status::Reserved });
        let tail_offset = offset + size;
        if tail_offset < free_key.offset + free_size {
            inner.insert_free(ChunkKey { trunk_id, offset: tail_offset }, free_key.offset + free_size - tail_offset);
        }
        Ok(key)
    }

    /// Returns a used chunk to the free tree, coalescing with an immediately
    /// preceding or following free chunk in the same trunk.
    pub fn free(&self, key: ChunkKey) -> Result<(), TrunkError> {
        let mut inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        let mut size = match inner.chunks.get(&key) {
            Some(record) if record.status == Status::Used => record.size,
            _ => return Err(TrunkError::NotReserved { trunk_id: key.trunk_id, offset: key.offset }),
        };
        let mut start_offset = key.offset;
        inner.chunks.remove(&key);

        // Coalesce forward: the chunk immediately after us, if free.
        let next_key = ChunkKey { trunk_id: key.trunk_id, offset: start_offset + size };
        if let Some(next) = inner.chunks.get(&next_key).copied() {
            if next.status == Status::Free {
                inner.remove_from_free_index(next_key, next.size);
                inner.chunks.remove(&next_key);
                size += next.size;
            }
        }

        // Coalesce backward: scan for a free chunk whose offset+size lands
        // exactly at our start. Trunk chunk counts are small enough per
        // trunk that a linear scan within the trunk is cheap relative to the
        // disk write this accompanies.
        if let Some((&prev_key, _)) = inner
            .chunks
            .range(..ChunkKey { trunk_id: key.trunk_id, offset: start_offset })
            .rev()
            .find(|(k, r)| k.trunk_id == key.trunk_id && r.status == Status::Free && k.offset + r.size == start_offset)
        {
            let prev_size = inner.chunks[&prev_key].size;
            inner.remove_from_free_index(prev_key, prev_size);
            inner.chunks.remove(&prev_key);
            start_offset = prev_key.offset;
            size += prev_size;
        }

        inner.insert_free(ChunkKey { trunk_id: key.trunk_id, offset: start_offset }, size);
        Ok(())
    }

    /// Verifies `free + used == total_size` for one trunk (spec §4.5
    /// conservation invariant); intended for tests and periodic consistency
    /// checks, not the hot path.
    pub fn check_conservation(&self, trunk_id: u64, total_size: u64) -> Result<(), TrunkError> {
        let inner = self.inner.lock().expect("trunk allocator mutex poisoned");
        let total: u64 = inner
            .chunks
            .iter()
            .filter(|(k, _)| k.trunk_id == trunk_id)
            .map(|(_, r)| r.size)
            .sum();
        if total == total_size {
            Ok(())
        } else {
            Err(TrunkError::ConservationViolated { trunk_id, total, file_len: total_size })
        }
    }
}

impl Default for TrunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}
