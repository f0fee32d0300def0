//! Error taxonomy for the storage node core (spec §7).
//!
//! Every fallible boundary returns one of these types. `StorageError` is the
//! top-level error that reaches the dispatcher; it carries the POSIX-style
//! `status` byte that gets written into the next response frame.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while performing a single blocking disk operation.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("open failed for {path}: {source}")]
    Open { path: PathBuf, #[source] source: io::Error },
    #[error("read failed for {path}: {source}")]
    Read { path: PathBuf, #[source] source: io::Error },
    #[error("write failed for {path}: {source}")]
    Write { path: PathBuf, #[source] source: io::Error },
    #[error("seek failed for {path}: {source}")]
    Seek { path: PathBuf, #[source] source: io::Error },
    #[error("rename failed from {from} to {to}: {source}")]
    Rename { from: PathBuf, to: PathBuf, #[source] source: io::Error },
    #[error("unlink failed for {path}: {source}")]
    Unlink { path: PathBuf, #[source] source: io::Error },
    #[error("ftruncate failed for {path}: {source}")]
    Truncate { path: PathBuf, #[source] source: io::Error },
    #[error("fsync failed for {path}: {source}")]
    Fsync { path: PathBuf, #[source] source: io::Error },
    #[error("stat failed for {path}: {source}")]
    Stat { path: PathBuf, #[source] source: io::Error },
    #[error("not found: {path}")]
    NotFound { path: PathBuf },
    #[error("{path} still has {refcount} live link(s) pointing at it")]
    LinkedFileBusy { path: PathBuf, refcount: u64 },
    #[error("modify range ({offset}, {len}) would extend file of size {current_size}")]
    WouldExtend { offset: u64, len: u64, current_size: u64 },
    #[error("modify range ({offset}, {len}) falls in an unwritten region of size {current_size}")]
    SparseRegion { offset: u64, len: u64, current_size: u64 },
}

/// Malformed or unsupported wire-protocol input (spec §7 Protocol errors).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("declared body length {declared} exceeds task buffer size {limit}")]
    BodyTooLarge { declared: u64, limit: usize },
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
    #[error("malformed field: {0}")]
    MalformedField(&'static str),
    #[error("connection closed mid-frame")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the storage filename generator/parser (spec §4.4).
#[derive(Debug, Error, Clone, Copy)]
pub enum FilenameError {
    #[error("store path index {0} out of range")]
    BadStorePathIndex(u8),
    #[error("malformed logical filename")]
    Malformed,
    #[error("exhausted retries generating a unique filename")]
    Exhausted,
    #[error("empty slave prefix not allowed when master and slave extensions match")]
    EmptySlavePrefix,
    #[error("slave prefix must not contain '/'")]
    InvalidSlavePrefix,
}

/// Errors from the trunk allocator (spec §4.5).
#[derive(Debug, Error)]
pub enum TrunkError {
    #[error("no free chunk of at least {requested} bytes")]
    NoSpace { requested: u64 },
    #[error("chunk (trunk {trunk_id}, offset {offset}) is not reserved")]
    NotReserved { trunk_id: u64, offset: u64 },
    #[error("trunk conservation violated for trunk {trunk_id}: free+used={total} file_len={file_len}")]
    ConservationViolated { trunk_id: u64, total: u64, file_len: u64 },
    #[error(transparent)]
    Disk(#[from] DiskError),
}

/// Errors from the binlog subsystem (spec §4.6).
#[derive(Debug, Error)]
pub enum BinlogError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt binlog record at segment {segment} offset {offset}: {reason}")]
    Corrupt { segment: u64, offset: u64, reason: &'static str },
}

/// Errors from replication readers (spec §7 Peer errors — never fatal).
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("peer connection failed: {0}")]
    Connect(#[source] io::Error),
    #[error("peer rejected op with status {0}")]
    PeerStatus(u8),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Top-level error surfaced to the dispatcher / connection handler.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error(transparent)]
    Filename(#[from] FilenameError),
    #[error(transparent)]
    Trunk(#[from] TrunkError),
    #[error(transparent)]
    Binlog(#[from] BinlogError),
    #[error("unknown group {0}")]
    UnknownGroup(String),
    #[error("no store path satisfies the reserved-space policy")]
    NoSpace,
    #[error("file not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("disk worker queue is full")]
    QueueFull,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl StorageError {
    /// Maps to the wire protocol's single status byte (0 == success).
    ///
    /// The exact numeric mapping mirrors POSIX errno conventions the way the
    /// original protocol does: callers never need more granularity than "what
    /// status do I write in the response header".
    pub fn status_code(&self) -> u8 {
        match self {
            StorageError::NotFound => 2,       // ENOENT
            StorageError::AlreadyExists => 17, // EEXIST
            StorageError::NoSpace => 28,       // ENOSPC
            StorageError::InvalidArgument(_) => 22, // EINVAL
            StorageError::UnknownGroup(_) => 22,
            StorageError::QueueFull => 11, // EAGAIN
            StorageError::Disk(DiskError::NotFound { .. }) => 2,
            StorageError::Disk(DiskError::LinkedFileBusy { .. }) => 16, // EBUSY
            StorageError::Disk(DiskError::WouldExtend { .. }) => 22,
            StorageError::Disk(DiskError::SparseRegion { .. }) => 22,
            StorageError::Disk(_) => 5, // EIO
            StorageError::Filename(_) => 22,
            StorageError::Trunk(_) => 5,
            StorageError::Binlog(_) => 5,
            StorageError::Protocol(_) => 22,
        }
    }
}

pub type DiskResult<T> = Result<T, DiskError>;
pub type StorageResult<T> = Result<T, StorageError>;
