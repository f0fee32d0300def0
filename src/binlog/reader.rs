//! Binlog segment reader (spec §4.6, §4.7), used by replication readers to
//! tail a store path's binlog and by bootstrap catch-up to replay history.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::binlog::record::Record;
use crate::binlog::writer::segment_path;
use crate::error::BinlogError;

/// A cursor into one binlog segment. Calling [`Self::next`] past the
/// segment's current end-of-file returns `None` without error — the caller
/// decides whether to poll again or roll forward to the next segment once a
/// newer one exists on disk.
pub struct SegmentReader {
    dir: std::path::PathBuf,
    segment: u64,
    reader: BufReader<File>,
    offset: u64,
}

impl SegmentReader {
    pub fn open(dir: &Path, segment: u64, start_offset: u64) -> Result<Self, BinlogError> {
        let mut file = File::open(segment_path(dir, segment))?;
        file.seek(SeekFrom::Start(start_offset))?;
        Ok(Self { dir: dir.to_path_buf(), segment, reader: BufReader::new(file), offset: start_offset })
    }

    /// Reads the next complete line, if one is available. A partial line at
    /// EOF (the writer mid-append) is left unconsumed by seeking back, so a
    /// retry after the writer finishes its append picks it up whole.
    pub fn next(&mut self) -> Result<Option<Record>, BinlogError> {
        let mut line = String::new();
        let start = self.offset;
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') {
            self.reader.seek_relative(-(n as i64))?;
            return Ok(None);
        }
        self.offset += n as u64;
        let record = Record::parse(&line, self.segment, start)?;
        Ok(Some(record))
    }

    /// Rolls forward to the next segment file, if it exists, resetting the
    /// offset to zero.
    pub fn roll_forward(&mut self) -> Result<bool, BinlogError> {
        let next_segment = self.segment + 1;
        let path = segment_path(&self.dir, next_segment);
        if !path.exists() {
            return Ok(false);
        }
        let file = File::open(path)?;
        self.reader = BufReader::new(file);
        self.segment = next_segment;
        self.offset = 0;
        Ok(true)
    }

    pub fn segment(&self) -> u64 {
        self.segment
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
