//! Append algorithm for appender files (spec §4.3).
//!
//! Appends happen in place, so a failed write can't just be discarded like a
//! temp file — the original length is recorded first and the file is
//! truncated back to it if the write or fsync fails partway through.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::disk::write::crc32;
use crate::error::DiskError;

pub struct AppendOutcome {
    pub new_size: u64,
    /// CRC of the bytes appended in this call, not the whole file — the
    /// caller combines it with the file's running CRC if one is tracked.
    pub appended_crc32: u32,
}

pub fn append(path: &Path, data: &[u8]) -> Result<AppendOutcome, DiskError> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| DiskError::Open { path: path.to_path_buf(), source: e })?;
    let original_len = file
        .metadata()
        .map_err(|e| DiskError::Stat { path: path.to_path_buf(), source: e })?
        .len();

    let result = (|| -> Result<u64, DiskError> {
        file.seek(SeekFrom::End(0)).map_err(|e| DiskError::Seek { path: path.to_path_buf(), source: e })?;
        file.write_all(data).map_err(|e| DiskError::Write { path: path.to_path_buf(), source: e })?;
        file.sync_all().map_err(|e| DiskError::Fsync { path: path.to_path_buf(), source: e })?;
        Ok(original_len + data.len() as u64)
    })();

    match result {
        Ok(new_size) => Ok(AppendOutcome { new_size, appended_crc32: crc32(data) }),
        Err(e) => {
            let _ = file.set_len(original_len);
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn appends_past_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abc").unwrap();
        let outcome = append(&path, b"def").unwrap();
        assert_eq!(outcome.new_size, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
