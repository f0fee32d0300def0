//! Upload (write) algorithm (spec §4.3).
//!
//! A new file's bytes are written to a temp path beside the final
//! destination, fsync'd, then renamed into place. If anything fails before
//! the rename, the temp file is removed and the caller never advances its
//! filename generator's collision set or the binlog — a half-written file
//! never becomes visible.

use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use crate::error::DiskError;

pub struct WriteOutcome {
    pub final_path: PathBuf,
    pub crc32: u32,
}

/// Writes `data` to `final_path`, which must not already exist. `final_path`
/// includes the two-level fan-out directories, which are created if
/// missing.
pub fn write_new(final_path: &Path, data: &[u8]) -> Result<WriteOutcome, DiskError> {
    let parent = final_path.parent().expect("final_path always has a parent");
    std::fs::create_dir_all(parent)
        .map_err(|e| DiskError::Open { path: parent.to_path_buf(), source: e })?;

    let tmp_path = tmp_path_for(final_path);
    let write_result = (|| -> Result<(), DiskError> {
        std::fs::write(&tmp_path, data).map_err(|e| DiskError::Write { path: tmp_path.clone(), source: e })?;
        let file = std::fs::File::open(&tmp_path)
            .map_err(|e| DiskError::Open { path: tmp_path.clone(), source: e })?;
        file.sync_all().map_err(|e| DiskError::Fsync { path: tmp_path.clone(), source: e })?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    std::fs::rename(&tmp_path, final_path)
        .map_err(|e| DiskError::Rename { from: tmp_path.clone(), to: final_path.to_path_buf(), source: e })?;

    let mut hasher = Hasher::new();
    hasher.update(data);
    Ok(WriteOutcome { final_path: final_path.to_path_buf(), crc32: hasher.finalize() })
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap().to_owned();
    name.push(".tmp");
    final_path.with_file_name(name)
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_and_computes_crc() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("M00/00/00/abc.txt");
        let outcome = write_new(&final_path, b"hello").unwrap();
        assert_eq!(std::fs::read(&outcome.final_path).unwrap(), b"hello");
        assert_eq!(outcome.crc32, crc32(b"hello"));
        assert!(!tmp_path_for(&final_path).exists());
    }

    #[test]
    fn leaves_no_temp_file_on_parent_creation() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("nested/M00/00/00/abc.txt");
        write_new(&final_path, b"data").unwrap();
        assert!(final_path.exists());
    }
}
