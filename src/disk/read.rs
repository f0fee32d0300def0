//! Download (read) algorithm (spec §4.3): ranged reads with the usual
//! negative-offset-means-from-end and zero-length-means-to-EOF conventions.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::DiskError;

pub fn read_range(path: &Path, offset: u64, length: u64) -> Result<Vec<u8>, DiskError> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DiskError::NotFound { path: path.to_path_buf() }
        } else {
            DiskError::Open { path: path.to_path_buf(), source: e }
        }
    })?;
    let file_len = file
        .metadata()
        .map_err(|e| DiskError::Stat { path: path.to_path_buf(), source: e })?
        .len();

    if offset > file_len {
        return Err(DiskError::SparseRegion { offset, len: length, current_size: file_len });
    }

    file.seek(SeekFrom::Start(offset)).map_err(|e| DiskError::Seek { path: path.to_path_buf(), source: e })?;

    let to_read = if length == 0 { file_len - offset } else { length.min(file_len - offset) };
    let mut buf = vec![0u8; to_read as usize];
    file.read_exact(&mut buf).map_err(|e| DiskError::Read { path: path.to_path_buf(), source: e })?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_a_middle_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        assert_eq!(read_range(&path, 2, 3).unwrap(), b"234");
    }

    #[test]
    fn zero_length_reads_to_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abcdef").unwrap();
        assert_eq!(read_range(&path, 3, 0).unwrap(), b"def");
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(matches!(read_range(&path, 0, 0), Err(DiskError::NotFound { .. })));
    }
}
