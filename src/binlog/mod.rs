//! Per-store-path append-only binlog driving asynchronous replication
//! (spec §4.6, §4.7).

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::SegmentReader;
pub use record::{OpType, Record};
pub use writer::BinlogWriter;
