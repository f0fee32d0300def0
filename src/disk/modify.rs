//! In-place modify algorithm for appender files (spec §4.3).
//!
//! Unlike append, modify never changes the file's length: the write range
//! must already lie within `[0, current_size)`. Writing past the current
//! end would silently convert a modify into an append, which this rejects
//! instead (spec §4.3 edge case).

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::DiskError;

pub fn modify(path: &Path, offset: u64, data: &[u8]) -> Result<(), DiskError> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| DiskError::Open { path: path.to_path_buf(), source: e })?;
    let current_size = file
        .metadata()
        .map_err(|e| DiskError::Stat { path: path.to_path_buf(), source: e })?
        .len();

    if offset > current_size {
        return Err(DiskError::SparseRegion { offset, len: data.len() as u64, current_size });
    }
    if offset + data.len() as u64 > current_size {
        return Err(DiskError::WouldExtend { offset, len: data.len() as u64, current_size });
    }

    file.seek(SeekFrom::Start(offset)).map_err(|e| DiskError::Seek { path: path.to_path_buf(), source: e })?;
    file.write_all(data).map_err(|e| DiskError::Write { path: path.to_path_buf(), source: e })?;
    file.sync_all().map_err(|e| DiskError::Fsync { path: path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overwrites_a_middle_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        modify(&path, 2, b"XY").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"01XY456789");
    }

    #[test]
    fn rejects_range_extending_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert!(matches!(modify(&path, 1, b"xyz"), Err(DiskError::WouldExtend { .. })));
    }

    #[test]
    fn rejects_offset_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert!(matches!(modify(&path, 10, b"x"), Err(DiskError::SparseRegion { .. })));
    }
}
