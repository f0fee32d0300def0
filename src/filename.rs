//! Storage filename scheme (spec §3, §4.4).
//!
//! A logical filename is `M<NN>/<HH>/<HH>/<base64>[.<ext>]`. The base64
//! payload packs {origin server id, creation time, masked size, crc32} so
//! that a peer replica can recover everything about a file's provenance
//! without a lookup. Trunk-member files carry a second, fixed-width base64
//! block appended after the first, encoding the trunk location record.
//!
//! The spec's own prose is internally inconsistent about the payload's raw
//! byte count ("a 15-byte payload" in §3 vs "20 bytes (15 raw bytes
//! encoded)" in §4.4 — 27% off either reading). We take the field list in §3
//! as ground truth (origin id 4B + ctime 4B + size 8B + crc32 4B = 20 raw
//! bytes) since that is what testable property 2 (CRC faithfulness) and
//! invariant "base64 payload is authoritative source of origin id, creation
//! time and true size" depend on. See DESIGN.md.

use std::sync::atomic::{AtomicU32, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::FilenameError;

/// Raw byte length of the base64 payload (spec §3: origin id 4 + ctime 4 +
/// masked size 8 + crc32 4).
pub const PAYLOAD_RAW_LEN: usize = 20;
/// Raw byte length of the trunk-location suffix (trunk id + offset + size,
/// each a u64).
pub const TRUNK_SUFFIX_RAW_LEN: usize = 24;

const TRUNK_BIT: u64 = 1 << 63;
const APPENDER_BIT: u64 = 1 << 62;
const LARGE_BIT: u64 = 1 << 61;
const NONCE_SHIFT: u32 = 32;
const NONCE_MASK: u64 = 0x1FFF_FFFF << NONCE_SHIFT; // bits 32..60, 29 bits
const LOW32_MASK: u64 = 0xFFFF_FFFF;

/// Which flavor of file the size field's sentinel bits describe (spec §3
/// invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Regular,
    Appender,
    TrunkMember,
}

/// The decoded contents of the size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeField(u64);

impl SizeField {
    pub fn regular(size: u64, nonce: u32) -> Self {
        Self(Self::pack_size(size, nonce))
    }

    pub fn appender(size: u64, nonce: u32) -> Self {
        Self(APPENDER_BIT | Self::pack_size(size, nonce))
    }

    /// `extra` is an opaque per-chunk nonce mixed into the non-sentinel bits;
    /// the true size for a trunk member is recovered from the trunk location
    /// suffix, not from this field (spec §3 invariant).
    pub fn trunk_member(nonce: u32) -> Self {
        Self(TRUNK_BIT | ((nonce as u64) << NONCE_SHIFT & NONCE_MASK))
    }

    fn pack_size(size: u64, nonce: u32) -> u64 {
        if size <= LOW32_MASK {
            (size & LOW32_MASK) | ((nonce as u64) << NONCE_SHIFT & NONCE_MASK)
        } else {
            LARGE_BIT | (size & (LARGE_BIT - 1))
        }
    }

    pub fn kind(&self) -> SizeKind {
        if self.0 & TRUNK_BIT != 0 {
            SizeKind::TrunkMember
        } else if self.0 & APPENDER_BIT != 0 {
            SizeKind::Appender
        } else {
            SizeKind::Regular
        }
    }

    /// The true size, for regular and appender files only (spec §3: for
    /// trunk members the size comes from the trunk location record).
    pub fn true_size(&self) -> Option<u64> {
        match self.kind() {
            SizeKind::TrunkMember => None,
            _ => {
                let body = self.0 & !(TRUNK_BIT | APPENDER_BIT);
                if body & LARGE_BIT != 0 {
                    Some(body & (LARGE_BIT - 1))
                } else {
                    Some(body & LOW32_MASK)
                }
            }
        }
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Decoded base64 payload (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub origin_server_id: u32,
    pub create_time: u32,
    pub size: SizeField,
    pub crc32: u32,
}

impl Payload {
    pub fn encode(&self) -> String {
        let mut raw = [0u8; PAYLOAD_RAW_LEN];
        raw[0..4].copy_from_slice(&self.origin_server_id.to_be_bytes());
        raw[4..8].copy_from_slice(&self.create_time.to_be_bytes());
        raw[8..16].copy_from_slice(&self.size.raw().to_be_bytes());
        raw[16..20].copy_from_slice(&self.crc32.to_be_bytes());
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(encoded: &str) -> Result<Self, FilenameError> {
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| FilenameError::Malformed)?;
        if raw.len() != PAYLOAD_RAW_LEN {
            return Err(FilenameError::Malformed);
        }
        let origin_server_id = u32::from_be_bytes(raw[0..4].try_into().unwrap());
        let create_time = u32::from_be_bytes(raw[4..8].try_into().unwrap());
        let size = SizeField::from_raw(u64::from_be_bytes(raw[8..16].try_into().unwrap()));
        let crc32 = u32::from_be_bytes(raw[16..20].try_into().unwrap());
        Ok(Self { origin_server_id, create_time, size, crc32 })
    }
}

/// A trunk-member's location, recovered from the extended filename suffix
/// (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunkLocation {
    pub trunk_id: u64,
    pub offset: u64,
    pub size: u64,
}

impl TrunkLocation {
    fn encode(&self) -> String {
        let mut raw = [0u8; TRUNK_SUFFIX_RAW_LEN];
        raw[0..8].copy_from_slice(&self.trunk_id.to_be_bytes());
        raw[8..16].copy_from_slice(&self.offset.to_be_bytes());
        raw[16..24].copy_from_slice(&self.size.to_be_bytes());
        URL_SAFE_NO_PAD.encode(raw)
    }

    fn decode(encoded: &str) -> Result<Self, FilenameError> {
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| FilenameError::Malformed)?;
        if raw.len() != TRUNK_SUFFIX_RAW_LEN {
            return Err(FilenameError::Malformed);
        }
        Ok(Self {
            trunk_id: u64::from_be_bytes(raw[0..8].try_into().unwrap()),
            offset: u64::from_be_bytes(raw[8..16].try_into().unwrap()),
            size: u64::from_be_bytes(raw[16..24].try_into().unwrap()),
        })
    }
}

/// A fully parsed logical filename (spec §3).
#[derive(Debug, Clone)]
pub struct LogicalFilename {
    pub store_path_index: u8,
    pub dir_high: u8,
    pub dir_low: u8,
    pub payload: Payload,
    pub trunk_location: Option<TrunkLocation>,
    pub slave_prefix: Option<String>,
    pub ext: Option<String>,
}

impl LogicalFilename {
    pub fn is_trunk_member(&self) -> bool {
        self.payload.size.kind() == SizeKind::TrunkMember
    }

    pub fn is_appender(&self) -> bool {
        self.payload.size.kind() == SizeKind::Appender
    }

    /// Renders the canonical `M<NN>/<HH>/<HH>/<base64>[.<ext>]` string.
    pub fn render(&self) -> String {
        let mut base64_part = self.payload.encode();
        if let Some(loc) = &self.trunk_location {
            base64_part.push_str(&loc.encode());
        }
        if let Some(prefix) = &self.slave_prefix {
            base64_part.push_str(prefix);
        }
        let mut out = format!(
            "M{:02}/{:02X}/{:02X}/{}",
            self.store_path_index, self.dir_high, self.dir_low, base64_part
        );
        if let Some(ext) = &self.ext {
            out.push('.');
            out.push_str(ext);
        }
        out
    }

    /// Parses a logical filename produced by [`Self::render`].
    pub fn parse(s: &str) -> Result<Self, FilenameError> {
        let (path_part, ext) = match s.rsplit_once('.') {
            Some((p, e)) if !e.contains('/') => (p, Some(e.to_string())),
            _ => (s, None),
        };
        let mut segments = path_part.splitn(4, '/');
        let store_seg = segments.next().ok_or(FilenameError::Malformed)?;
        let dir_high_seg = segments.next().ok_or(FilenameError::Malformed)?;
        let dir_low_seg = segments.next().ok_or(FilenameError::Malformed)?;
        let base64_part = segments.next().ok_or(FilenameError::Malformed)?;

        let store_path_index: u8 = store_seg
            .strip_prefix('M')
            .and_then(|n| n.parse().ok())
            .ok_or(FilenameError::Malformed)?;
        let dir_high = u8::from_str_radix(dir_high_seg, 16).map_err(|_| FilenameError::Malformed)?;
        let dir_low = u8::from_str_radix(dir_low_seg, 16).map_err(|_| FilenameError::Malformed)?;

        let payload_encoded_len = base64_encoded_len(PAYLOAD_RAW_LEN);
        if base64_part.len() < payload_encoded_len {
            return Err(FilenameError::Malformed);
        }
        let (payload_str, rest) = base64_part.split_at(payload_encoded_len);
        let payload = Payload::decode(payload_str)?;

        let (trunk_location, rest) = if payload.size.kind() == SizeKind::TrunkMember {
            let suffix_len = base64_encoded_len(TRUNK_SUFFIX_RAW_LEN);
            if rest.len() < suffix_len {
                return Err(FilenameError::Malformed);
            }
            let (suffix_str, rest) = rest.split_at(suffix_len);
            (Some(TrunkLocation::decode(suffix_str)?), rest)
        } else {
            (None, rest)
        };

        let slave_prefix = if rest.is_empty() { None } else { Some(rest.to_string()) };

        Ok(Self {
            store_path_index,
            dir_high,
            dir_low,
            payload,
            trunk_location,
            slave_prefix,
            ext,
        })
    }
}

fn base64_encoded_len(raw_len: usize) -> usize {
    (raw_len * 8).div_ceil(6)
}

/// PJW (ELF) hash used in hash-distribution mode (spec §4.4).
pub fn pjw_hash(data: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in data {
        h = (h << 4).wrapping_add(byte as u32);
        let high = h & 0xF000_0000;
        if high != 0 {
            h ^= high >> 24;
        }
        h &= !high;
    }
    h
}

/// Picks the two-level fan-out directory indices for a freshly generated
/// file (spec §4.4: hash mode or round-robin mode).
#[derive(Debug)]
pub enum FanoutMode {
    Hash,
    RoundRobin { rotate_every: u32 },
}

/// Rotating counter backing round-robin fan-out mode.
pub struct RoundRobinCounter {
    counter: AtomicU32,
    files_since_rotate: AtomicU32,
    rotate_every: u32,
    subdir_count: u32,
}

impl RoundRobinCounter {
    pub fn new(subdir_count: u32, rotate_every: u32) -> Self {
        Self {
            counter: AtomicU32::new(0),
            files_since_rotate: AtomicU32::new(0),
            rotate_every,
            subdir_count,
        }
    }

    pub fn next(&self) -> u32 {
        let seen = self.files_since_rotate.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.rotate_every == 0 {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counter.load(Ordering::Relaxed) % self.subdir_count
    }
}

/// Chooses `(dir_high, dir_low)` for a payload, given the configured mode.
pub fn choose_fanout(
    payload_bytes: &[u8],
    subdir_count: u32,
    mode: &FanoutMode,
    round_robin: Option<&RoundRobinCounter>,
) -> (u8, u8) {
    match mode {
        FanoutMode::Hash => {
            let hash = pjw_hash(payload_bytes);
            let high = (hash % subdir_count) as u8;
            let low = ((hash / subdir_count) % subdir_count) as u8;
            (high, low)
        }
        FanoutMode::RoundRobin { .. } => {
            let counter = round_robin.expect("round-robin mode requires a counter");
            let high = counter.next() as u8;
            let low = counter.next() as u8;
            (high, low)
        }
    }
}

/// Derives a slave filename from a master's [`LogicalFilename`] (spec §4.4).
///
/// An empty `prefix` is rejected when `slave_ext` equals the master's
/// extension, since that would produce an identical path.
pub fn slave_filename(
    master: &LogicalFilename,
    prefix: &str,
    slave_ext: Option<&str>,
) -> Result<LogicalFilename, FilenameError> {
    if prefix.contains('/') {
        return Err(FilenameError::InvalidSlavePrefix);
    }
    if prefix.is_empty() && slave_ext == master.ext.as_deref() {
        return Err(FilenameError::EmptySlavePrefix);
    }
    let mut slave = master.clone();
    slave.slave_prefix = Some(prefix.to_string());
    slave.ext = slave_ext.map(|s| s.to_string()).or_else(|| master.ext.clone());
    Ok(slave)
}

const MAX_GENERATION_RETRIES: u32 = 10;

/// Generates a fresh, collision-checked logical filename (spec §4.4).
///
/// `exists` should report whether a candidate path is already occupied on
/// disk; the generator retries with fresh randomness in the size field's
/// nonce bits up to [`MAX_GENERATION_RETRIES`] times.
pub fn generate_unique(
    store_path_index: u8,
    origin_server_id: u32,
    create_time: u32,
    size: u64,
    crc32: u32,
    ext: Option<&str>,
    appender: bool,
    subdir_count: u32,
    mode: &FanoutMode,
    round_robin: Option<&RoundRobinCounter>,
    nonce_source: impl Fn(u32) -> u32,
    exists: impl Fn(&str) -> bool,
) -> Result<LogicalFilename, FilenameError> {
    for attempt in 0..MAX_GENERATION_RETRIES {
        let nonce = nonce_source(attempt);
        let size_field =
            if appender { SizeField::appender(size, nonce) } else { SizeField::regular(size, nonce) };
        let payload =
            Payload { origin_server_id, create_time, size: size_field, crc32 };
        let payload_encoded = payload.encode();
        let (dir_high, dir_low) =
            choose_fanout(payload_encoded.as_bytes(), subdir_count, mode, round_robin);
        let candidate = LogicalFilename {
            store_path_index,
            dir_high,
            dir_low,
            payload,
            trunk_location: None,
            slave_prefix: None,
            ext: ext.map(|s| s.to_string()),
        };
        let rendered = candidate.render();
        if !exists(&rendered) {
            return Ok(candidate);
        }
    }
    Err(FilenameError::Exhausted)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_regular_file() {
        let payload =
            Payload { origin_server_id: 7, create_time: 1_700_000_000, size: SizeField::regular(5, 0), crc32: 0x1234_5678 };
        let logical = LogicalFilename {
            store_path_index: 0,
            dir_high: 0x1A,
            dir_low: 0x2B,
            payload,
            trunk_location: None,
            slave_prefix: None,
            ext: Some("txt".to_string()),
        };
        let rendered = logical.render();
        assert!(rendered.starts_with("M00/1A/2B/"));
        let parsed = LogicalFilename::parse(&rendered).unwrap();
        assert_eq!(parsed.payload.size.true_size(), Some(5));
        assert_eq!(parsed.payload.crc32, 0x1234_5678);
        assert_eq!(parsed.ext.as_deref(), Some("txt"));
        assert!(!parsed.is_trunk_member());
    }

    #[test]
    fn trunk_member_round_trips_location() {
        let payload = Payload {
            origin_server_id: 1,
            create_time: 42,
            size: SizeField::trunk_member(0),
            crc32: 99,
        };
        let logical = LogicalFilename {
            store_path_index: 1,
            dir_high: 0,
            dir_low: 0,
            payload,
            trunk_location: Some(TrunkLocation { trunk_id: 3, offset: 4096, size: 200 }),
            slave_prefix: None,
            ext: Some("jpg".to_string()),
        };
        let rendered = logical.render();
        let parsed = LogicalFilename::parse(&rendered).unwrap();
        assert!(parsed.is_trunk_member());
        assert_eq!(parsed.payload.size.true_size(), None);
        let loc = parsed.trunk_location.unwrap();
        assert_eq!(loc, TrunkLocation { trunk_id: 3, offset: 4096, size: 200 });
    }

    #[test]
    fn slave_rejects_empty_prefix_with_matching_extension() {
        let payload =
            Payload { origin_server_id: 1, create_time: 1, size: SizeField::regular(1, 0), crc32: 1 };
        let master = LogicalFilename {
            store_path_index: 0,
            dir_high: 0,
            dir_low: 0,
            payload,
            trunk_location: None,
            slave_prefix: None,
            ext: Some("txt".to_string()),
        };
        assert!(matches!(
            slave_filename(&master, "", Some("txt")),
            Err(FilenameError::EmptySlavePrefix)
        ));
        assert!(slave_filename(&master, "_thumb", Some("txt")).is_ok());
    }

    #[test]
    fn generation_retries_on_collision() {
        let mut seen = std::collections::HashSet::new();
        seen.insert(
            generate_unique(
                0, 1, 1, 5, 1, Some("txt"), false, 2, &FanoutMode::Hash, None,
                |_| 0, |_| false,
            )
            .unwrap()
            .render(),
        );
        let existing = seen.clone();
        let second = generate_unique(
            0, 1, 1, 5, 1, Some("txt"), false, 2, &FanoutMode::Hash, None,
            |attempt| attempt, // distinct nonce each retry
            |candidate| existing.contains(candidate),
        )
        .unwrap();
        assert!(!existing.contains(&second.render()));
    }
}
