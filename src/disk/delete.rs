//! Delete algorithm (spec §4.3): unlinks the data file and, if present, its
//! metadata sidecar. A missing data file is not an error here — deletes are
//! idempotent so a replayed sync-delete from a peer never fails the
//! replication reader.

use std::path::Path;

use crate::error::DiskError;
use crate::metadata::sidecar_path;

pub fn delete(path: &Path) -> Result<(), DiskError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DiskError::Unlink { path: path.to_path_buf(), source: e }),
    }
    let sidecar = sidecar_path(path);
    match std::fs::remove_file(&sidecar) {
        Ok(()) | Err(_) => {} // sidecar is optional; any failure here is non-fatal
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deletes_data_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();
        std::fs::write(sidecar_path(&path), b"meta").unwrap();
        delete(&path).unwrap();
        assert!(!path.exists());
        assert!(!sidecar_path(&path).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        delete(&path).unwrap();
    }
}
