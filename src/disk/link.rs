//! Link-file lifecycle (spec §3): a link is a symlink pointing at its
//! master file. Deleting a link never deletes the target; deleting the
//! target itself only succeeds once every link pointing at it has been
//! removed. The refcount lives in a sidecar file next to the master,
//! mirroring how `metadata::sidecar_path` keeps its own side-channel state
//! off the primary data file.

use std::path::{Path, PathBuf};

use crate::error::DiskError;

fn refcount_path(master: &Path) -> PathBuf {
    let mut path = master.as_os_str().to_owned();
    path.push("-lnk");
    PathBuf::from(path)
}

fn read_refcount(master: &Path) -> u64 {
    std::fs::read_to_string(refcount_path(master))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn write_refcount(master: &Path, count: u64) -> std::io::Result<()> {
    if count == 0 {
        match std::fs::remove_file(refcount_path(master)) {
            Ok(()) | Err(_) => Ok(()),
        }
    } else {
        std::fs::write(refcount_path(master), count.to_string())
    }
}

/// Creates `link_path` as a symlink to `master_path` and bumps the
/// master's refcount so it can't be deleted out from under the link.
pub fn create_link(link_path: &Path, master_path: &Path) -> Result<(), DiskError> {
    let parent = link_path.parent().expect("link_path always has a parent");
    std::fs::create_dir_all(parent).map_err(|e| DiskError::Open { path: parent.to_path_buf(), source: e })?;

    #[cfg(unix)]
    std::os::unix::fs::symlink(master_path, link_path)
        .map_err(|e| DiskError::Write { path: link_path.to_path_buf(), source: e })?;
    #[cfg(not(unix))]
    {
        std::fs::copy(master_path, link_path)
            .map_err(|e| DiskError::Write { path: link_path.to_path_buf(), source: e })?;
    }

    let count = read_refcount(master_path) + 1;
    write_refcount(master_path, count)
        .map_err(|e| DiskError::Write { path: refcount_path(master_path), source: e })?;
    Ok(())
}

/// Deletes `path`, honoring link semantics: a symlink only removes itself
/// and decrements its target's refcount; a plain file refuses to delete
/// while any link still points at it.
pub fn delete_link_aware(path: &Path) -> Result<(), DiskError> {
    let is_symlink = std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    if is_symlink {
        if let Ok(target) = std::fs::read_link(path) {
            let count = read_refcount(&target).saturating_sub(1);
            let _ = write_refcount(&target, count);
        }
        return match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DiskError::Unlink { path: path.to_path_buf(), source: e }),
        };
    }

    let refcount = read_refcount(path);
    if refcount > 0 {
        return Err(DiskError::LinkedFileBusy { path: path.to_path_buf(), refcount });
    }

    super::delete::delete(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deleting_link_leaves_target_intact() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("M00/00/00/master.txt");
        std::fs::create_dir_all(master.parent().unwrap()).unwrap();
        std::fs::write(&master, b"payload").unwrap();
        let link = dir.path().join("M00/00/00/link.txt");

        create_link(&link, &master).unwrap();
        assert!(link.exists());

        delete_link_aware(&link).unwrap();
        assert!(!link.exists());
        assert!(master.exists());
    }

    #[test]
    fn deleting_master_with_live_link_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("M00/00/00/master.txt");
        std::fs::create_dir_all(master.parent().unwrap()).unwrap();
        std::fs::write(&master, b"payload").unwrap();
        let link = dir.path().join("M00/00/00/link.txt");
        create_link(&link, &master).unwrap();

        let result = delete_link_aware(&master);
        assert!(matches!(result, Err(DiskError::LinkedFileBusy { .. })));
        assert!(master.exists());
    }

    #[test]
    fn deleting_master_after_last_link_removed_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("M00/00/00/master.txt");
        std::fs::create_dir_all(master.parent().unwrap()).unwrap();
        std::fs::write(&master, b"payload").unwrap();
        let link = dir.path().join("M00/00/00/link.txt");
        create_link(&link, &master).unwrap();
        delete_link_aware(&link).unwrap();

        delete_link_aware(&master).unwrap();
        assert!(!master.exists());
    }
}
