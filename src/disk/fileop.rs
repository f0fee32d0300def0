//! File-Op context: one unit of work handed from the async dispatcher to a
//! disk worker thread (spec §4.2, §9).
//!
//! Earlier drafts of this module attached "before-open"/"before-close" hook
//! closures to the context so cross-cutting concerns (binlog append,
//! replication fan-out) could run without the op algorithms knowing about
//! them. Idiomatic Rust prefers data over stored closures here: a worker
//! just returns a [`FileOpOutcome`] describing what happened, and the
//! dispatcher (which already owns the binlog writer and the peer readers)
//! reacts to it. See DESIGN.md.

use crate::binlog::OpType;

#[derive(Debug)]
pub enum FileOpKind {
    WriteNew { ext: String, data: Vec<u8> },
    WriteSlave { master_filename: String, prefix: String, ext: String, data: Vec<u8> },
    /// A regular write eligible for trunk packing (spec §4.5): the worker
    /// reserves a chunk from the store path's trunk allocator instead of
    /// creating a standalone file.
    WriteTrunk { ext: String, data: Vec<u8> },
    /// Creates `logical_filename` as a link pointing at `master_filename`
    /// (spec §3): deleting the link never deletes the target.
    CreateLink { master_filename: String },
    Read { offset: u64, length: u64 },
    /// Reads a trunk member's whole payload back out of the trunk file at
    /// `trunk_id`/`offset`; the dispatcher slices the caller's requested
    /// range out of the result since the trunk store only knows chunk
    /// boundaries, not client-requested ranges.
    ReadTrunk { trunk_id: u64, offset: u64, size: u64 },
    /// Frees a trunk member's chunk instead of unlinking a standalone file.
    DeleteTrunk { trunk_id: u64, offset: u64 },
    Append { data: Vec<u8> },
    Modify { offset: u64, data: Vec<u8> },
    Truncate { remain_size: u64 },
    Delete,
    SetMetadata { meta_bytes: Vec<u8>, overwrite: bool },
    GetMetadata,
}

/// Whether this op originated locally (from a client connection) or is a
/// replay of a peer's sync-* command (spec §9: a replica never re-emits a
/// binlog record for something it received as a replica).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Replica,
}

#[derive(Debug)]
pub struct FileOpContext {
    pub store_path_index: u8,
    pub logical_filename: String,
    pub kind: FileOpKind,
    pub origin: Origin,
}

#[derive(Debug)]
pub enum FileOpOutcome {
    Wrote { crc32: u32, size: u64 },
    /// A [`FileOpKind::WriteTrunk`] landed in a trunk file at `trunk_id`/`offset`
    /// instead of becoming a standalone file.
    WroteTrunk { crc32: u32, size: u64, trunk_id: u64, offset: u64 },
    Read { data: Vec<u8> },
    Appended { new_size: u64 },
    /// Carries the write offset back out so the dispatcher can record it as
    /// the binlog record's `extra` field; a replication reader needs it to
    /// replay the same in-place write on a peer (spec §4.3, §4.7).
    Modified { offset: u64 },
    /// Carries the new size back out so it can ride as the binlog record's
    /// `extra` field (spec §4.7: a replica replays the same remain_size).
    Truncated { remain_size: u64 },
    Deleted,
    /// Carries the link target back out for the same reason.
    LinkCreated { master_filename: String },
    MetadataSet,
    MetadataRead { bytes: Vec<u8> },
}

impl FileOpOutcome {
    /// The binlog op-type this outcome should be recorded under, if any
    /// (reads never touch the binlog). `origin` picks the source/replica
    /// half of the pair: a replayed peer op is logged under its replica
    /// letter so this node's own replication readers never re-forward it.
    pub fn binlog_op(&self, origin: Origin) -> Option<OpType> {
        let source_op = match self {
            FileOpOutcome::Wrote { .. } | FileOpOutcome::WroteTrunk { .. } => OpType::SourceCreateFile,
            FileOpOutcome::Appended { .. } => OpType::SourceAppendFile,
            FileOpOutcome::Modified { .. } => OpType::SourceModifyFile,
            FileOpOutcome::Truncated { .. } => OpType::SourceTruncateFile,
            FileOpOutcome::Deleted => OpType::SourceDeleteFile,
            FileOpOutcome::LinkCreated { .. } => OpType::SourceCreateLink,
            FileOpOutcome::MetadataSet => return None,
            FileOpOutcome::Read { .. } | FileOpOutcome::MetadataRead { .. } => return None,
        };
        Some(match origin {
            Origin::Local => source_op,
            Origin::Replica => source_op.as_replica(),
        })
    }
}
