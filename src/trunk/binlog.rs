//! Trunk binlog (spec §4.5): a separate append-only log of allocator events
//! (alloc/confirm/free), distinct from the per-file binlog in
//! [`crate::binlog`]. Replaying it lets a node that is promoted to trunk
//! server rebuild a [`crate::trunk::allocator::TrunkAllocator`] without
//! re-scanning every trunk file on disk.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::BinlogError;
use crate::trunk::allocator::ChunkKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkEvent {
    Alloc,
    Confirm,
    Free,
}

impl TrunkEvent {
    fn as_char(self) -> char {
        match self {
            TrunkEvent::Alloc => 'a',
            TrunkEvent::Confirm => 'c',
            TrunkEvent::Free => 'f',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'a' => TrunkEvent::Alloc,
            'c' => TrunkEvent::Confirm,
            'f' => TrunkEvent::Free,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunkBinlogRecord {
    pub event: TrunkEvent,
    pub trunk_id: u64,
    pub offset: u64,
    pub size: u64,
}

impl TrunkBinlogRecord {
    fn encode(&self) -> String {
        format!("{} {} {} {}\n", self.event.as_char(), self.trunk_id, self.offset, self.size)
    }

    fn parse(line: &str) -> Result<Self, BinlogError> {
        let line = line.trim_end_matches('\n');
        let mut parts = line.split(' ');
        let event = parts
            .next()
            .and_then(|s| s.chars().next())
            .and_then(TrunkEvent::from_char)
            .ok_or(BinlogError::Corrupt { segment: 0, offset: 0, reason: "unknown trunk event" })?;
        let trunk_id = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(BinlogError::Corrupt { segment: 0, offset: 0, reason: "missing trunk id" })?;
        let offset = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(BinlogError::Corrupt { segment: 0, offset: 0, reason: "missing offset" })?;
        let size = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(BinlogError::Corrupt { segment: 0, offset: 0, reason: "missing size" })?;
        Ok(Self { event, trunk_id, offset, size })
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey { trunk_id: self.trunk_id, offset: self.offset }
    }
}

/// Single-segment trunk binlog (trunk allocation volume is orders of
/// magnitude lower than file traffic, so unlike [`crate::binlog::writer`]
/// this doesn't bother rotating).
pub struct TrunkBinlog {
    file: Mutex<std::fs::File>,
}

impl TrunkBinlog {
    pub fn open(path: &Path) -> Result<Self, BinlogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub fn append(&self, record: &TrunkBinlogRecord) -> Result<(), BinlogError> {
        let mut file = self.file.lock().expect("trunk binlog mutex poisoned");
        file.write_all(record.encode().as_bytes())?;
        Ok(())
    }

    /// Reads every record in the log, in order, for replay at startup.
    pub fn replay(path: &Path) -> Result<Vec<TrunkBinlogRecord>, BinlogError> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            out.push(TrunkBinlogRecord::parse(&line)?);
        }
        Ok(out)
    }
}
