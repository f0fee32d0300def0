//! Truncate algorithm for appender files (spec §4.3): shrinks (or extends
//! with zero bytes) a file to an exact size.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::DiskError;

pub fn truncate(path: &Path, remain_size: u64) -> Result<(), DiskError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| DiskError::Open { path: path.to_path_buf(), source: e })?;
    file.set_len(remain_size).map_err(|e| DiskError::Truncate { path: path.to_path_buf(), source: e })?;
    file.sync_all().map_err(|e| DiskError::Fsync { path: path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shrinks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        truncate(&path, 4).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123");
    }

    #[test]
    fn extends_file_with_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"ab").unwrap();
        truncate(&path, 5).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ab\0\0\0");
    }
}
