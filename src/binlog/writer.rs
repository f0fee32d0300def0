//! Append-only binlog writer (spec §4.6).
//!
//! One writer per store path. Appends are guarded by a short-held
//! `std::sync::Mutex` (disk workers call this from blocking OS threads, never
//! from the async reactor), rotating to a new numbered segment once the
//! current one passes `rotation_bytes`. The segment index file
//! (`binlog.index`) is rewritten and `fsync`'d only on rotation, not on every
//! append — fsyncing every record would make the write path as slow as the
//! filesystem's own journal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::binlog::record::Record;
use crate::error::BinlogError;

struct WriterState {
    file: File,
    segment: u64,
    bytes_written: u64,
}

pub struct BinlogWriter {
    dir: PathBuf,
    rotation_bytes: u64,
    state: Mutex<WriterState>,
}

impl BinlogWriter {
    /// Opens (creating if absent) the binlog directory, resuming from
    /// whatever segment `binlog.index` names, or starting a fresh segment 0.
    pub fn open(dir: &Path, rotation_bytes: u64) -> Result<Self, BinlogError> {
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join("binlog.index");
        let segment = match std::fs::read_to_string(&index_path) {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let segment_path = segment_path(dir, segment);
        let file = OpenOptions::new().create(true).append(true).open(&segment_path)?;
        let bytes_written = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            rotation_bytes,
            state: Mutex::new(WriterState { file, segment, bytes_written }),
        })
    }

    /// Appends one record, rotating to a fresh segment first if the current
    /// one has grown past `rotation_bytes`.
    pub fn append(&self, record: &Record) -> Result<(u64, u64), BinlogError> {
        let encoded = record.encode();
        let mut state = self.state.lock().expect("binlog writer mutex poisoned");
        if state.bytes_written >= self.rotation_bytes {
            self.rotate(&mut state)?;
        }
        state.file.write_all(encoded.as_bytes())?;
        let offset = state.bytes_written;
        state.bytes_written += encoded.len() as u64;
        Ok((state.segment, offset))
    }

    fn rotate(&self, state: &mut WriterState) -> Result<(), BinlogError> {
        state.file.sync_all()?;
        state.segment += 1;
        state.file = OpenOptions::new().create(true).append(true).open(segment_path(&self.dir, state.segment))?;
        state.bytes_written = 0;
        let index_path = self.dir.join("binlog.index");
        let tmp = self.dir.join("binlog.index.tmp");
        std::fs::write(&tmp, state.segment.to_string())?;
        std::fs::rename(&tmp, &index_path)?;
        state.file.sync_all()?;
        Ok(())
    }

    pub fn current_segment(&self) -> u64 {
        self.state.lock().expect("binlog writer mutex poisoned").segment
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub fn segment_path(dir: &Path, segment: u64) -> PathBuf {
    dir.join(format!("binlog.{:06}", segment))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binlog::record::OpType;

    #[test]
    fn rotates_once_size_threshold_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BinlogWriter::open(dir.path(), 32).unwrap();
        let record = |i: u32| Record {
            timestamp: i,
            op: OpType::SourceCreateFile,
            filename: "M00/00/00/abcdefghijklmnop.txt".into(),
            extra: None,
        };
        let (seg0, _) = writer.append(&record(1)).unwrap();
        let (seg1, _) = writer.append(&record(2)).unwrap();
        assert_eq!(seg0, 0);
        assert!(seg1 >= seg0);
        assert_eq!(writer.current_segment(), seg1);
    }

    #[test]
    fn resumes_from_index_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let writer = BinlogWriter::open(dir.path(), 8).unwrap();
            for i in 0..5 {
                writer
                    .append(&Record {
                        timestamp: i,
                        op: OpType::SourceCreateFile,
                        filename: "M00/00/00/abc.txt".into(),
                        extra: None,
                    })
                    .unwrap();
            }
        }
        let reopened = BinlogWriter::open(dir.path(), 8).unwrap();
        assert!(reopened.current_segment() > 0);
    }
}
