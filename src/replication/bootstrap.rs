//! New-peer bootstrap (spec §4.7): before a freshly joined peer can simply
//! tail this node's live binlog, it needs every file that existed *before*
//! it joined. Rather than shipping the whole historical binlog (which may
//! have been rotated away long ago), bootstrap walks the store path's
//! directory tree and synthesizes a `Create` record per file found, handing
//! those to the same forwarding path a live tail would use.

use std::path::{Path, PathBuf};

use crate::binlog::record::{OpType, Record};

/// Recursively lists every regular file under a store path's fan-out
/// directories, synthesizing a `Create` record for each (spec §4.7).
///
/// Sidecar metadata files (suffixed `-m`) are skipped; they ride along with
/// their data file rather than being synced independently.
pub fn synthesize_create_records(store_path: &Path) -> std::io::Result<Vec<Record>> {
    let mut records = Vec::new();
    walk(store_path, store_path, &mut records)?;
    Ok(records)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<Record>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            continue;
        }
        if path.file_name().map(|n| n.to_string_lossy().ends_with("-m")).unwrap_or(false) {
            continue;
        }
        let relative = relative_filename(root, &path);
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        out.push(Record { timestamp: mtime, op: OpType::SourceCreateFile, filename: relative, extra: None });
    }
    Ok(())
}

fn relative_filename(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Whether a peer still needs bootstrap before its live tail is trustworthy
/// (spec §4.7: `need_sync_old && !sync_old_done`).
pub fn needs_bootstrap(mark: &crate::replication::mark::ReplicationMark) -> bool {
    mark.need_sync_old && !mark.sync_old_done
}

pub fn bootstrap_store_paths(base_path: &Path, store_path_dirs: &[PathBuf]) -> std::io::Result<Vec<Record>> {
    let mut all = Vec::new();
    for dir in store_path_dirs {
        all.extend(synthesize_create_records(&base_path.join(dir))?);
    }
    Ok(all)
}
