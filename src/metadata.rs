//! `.meta` sidecar parse/merge/overwrite (spec §4.8).
//!
//! Metadata is stored as a sidecar file next to the data file, one record per
//! key using `0x01` to separate records and `0x02` to separate a record's key
//! from its value. Writes go through a temp file + rename so a reader never
//! observes a half-written sidecar.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

const RECORD_SEPARATOR: u8 = 0x01;
const FIELD_SEPARATOR: u8 = 0x02;

/// An ordered set of metadata key/value pairs (spec §4.8: key order is not
/// semantically meaningful but `BTreeMap` gives deterministic serialization,
/// which matters for binlog reproducibility across replicas).
pub type Metadata = BTreeMap<String, String>;

pub fn encode(meta: &Metadata) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, (key, value)) in meta.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.extend_from_slice(key.as_bytes());
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(value.as_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Metadata {
    let mut meta = Metadata::new();
    if bytes.is_empty() {
        return meta;
    }
    for record in bytes.split(|&b| b == RECORD_SEPARATOR) {
        if record.is_empty() {
            continue;
        }
        if let Some(pos) = record.iter().position(|&b| b == FIELD_SEPARATOR) {
            let key = String::from_utf8_lossy(&record[..pos]).into_owned();
            let value = String::from_utf8_lossy(&record[pos + 1..]).into_owned();
            meta.insert(key, value);
        }
    }
    meta
}

pub fn sidecar_path(data_file: &Path) -> PathBuf {
    let mut path = data_file.as_os_str().to_owned();
    path.push("-m");
    PathBuf::from(path)
}

/// Overwrite mode replaces the sidecar's contents entirely; merge mode
/// layers the new pairs over the existing ones, keeping keys the request
/// didn't mention (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Overwrite,
    Merge,
}

/// Applies `incoming` to whatever sidecar currently exists at `data_file`
/// (or nothing, if there is none yet), atomically. Returns the final
/// metadata so the caller can hand it to the binlog writer.
pub fn apply(data_file: &Path, incoming: &Metadata, mode: MergeMode) -> io::Result<Metadata> {
    let sidecar = sidecar_path(data_file);
    let final_meta = match mode {
        MergeMode::Overwrite => incoming.clone(),
        MergeMode::Merge => {
            let mut merged = match std::fs::read(&sidecar) {
                Ok(bytes) => decode(&bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Metadata::new(),
                Err(e) => return Err(e),
            };
            for (k, v) in incoming {
                merged.insert(k.clone(), v.clone());
            }
            merged
        }
    };

    let tmp_path = sidecar.with_extension("tmp");
    std::fs::write(&tmp_path, encode(&final_meta))?;
    std::fs::rename(&tmp_path, &sidecar)?;
    Ok(final_meta)
}

pub fn read(data_file: &Path) -> io::Result<Metadata> {
    match std::fs::read(sidecar_path(data_file)) {
        Ok(bytes) => Ok(decode(&bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Metadata::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let mut meta = Metadata::new();
        meta.insert("width".to_string(), "800".to_string());
        meta.insert("height".to_string(), "600".to_string());
        let encoded = encode(&meta);
        assert_eq!(decode(&encoded), meta);
    }

    #[test]
    fn merge_keeps_untouched_keys_overwrite_replaces_all() {
        let dir = tempfile::tempdir().unwrap();
        let data_file = dir.path().join("M00/00/00/abc.jpg");
        std::fs::create_dir_all(data_file.parent().unwrap()).unwrap();

        let mut first = Metadata::new();
        first.insert("width".to_string(), "800".to_string());
        apply(&data_file, &first, MergeMode::Overwrite).unwrap();

        let mut second = Metadata::new();
        second.insert("height".to_string(), "600".to_string());
        let merged = apply(&data_file, &second, MergeMode::Merge).unwrap();
        assert_eq!(merged.get("width").map(String::as_str), Some("800"));
        assert_eq!(merged.get("height").map(String::as_str), Some("600"));

        let overwritten = apply(&data_file, &second, MergeMode::Overwrite).unwrap();
        assert_eq!(overwritten.get("width"), None);
        assert_eq!(overwritten.get("height").map(String::as_str), Some("600"));
    }
}
