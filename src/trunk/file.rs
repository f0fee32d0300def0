//! Trunk file chunk header layout (spec §4.5).
//!
//! Each chunk inside a trunk file is prefixed by a fixed-size header so a
//! trunk can be rebuilt by a linear scan if the allocator's in-memory free
//! tree is ever lost.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const CHUNK_HEADER_LEN: u64 = 1 + 8 + 4 + 4 + primitive_ext_len();

const fn primitive_ext_len() -> u64 {
    crate::protocol::primitive::FILE_EXT_NAME_LEN as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStatus {
    Free,
    Used,
}

#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub status: AllocStatus,
    pub size: u64,
    pub crc32: u32,
    pub mtime: u32,
    pub ext: String,
}

impl ChunkHeader {
    pub fn write(&self, dst: &mut impl Write) -> io::Result<()> {
        dst.write_u8(match self.status {
            AllocStatus::Free => 0,
            AllocStatus::Used => 1,
        })?;
        dst.write_u64::<BigEndian>(self.size)?;
        dst.write_u32::<BigEndian>(self.crc32)?;
        dst.write_u32::<BigEndian>(self.mtime)?;
        let mut ext_buf = [0u8; 6];
        let bytes = self.ext.as_bytes();
        let n = bytes.len().min(ext_buf.len());
        ext_buf[..n].copy_from_slice(&bytes[..n]);
        dst.write_all(&ext_buf)
    }

    pub fn read(src: &mut impl Read) -> io::Result<Self> {
        let status = match src.read_u8()? {
            0 => AllocStatus::Free,
            _ => AllocStatus::Used,
        };
        let size = src.read_u64::<BigEndian>()?;
        let crc32 = src.read_u32::<BigEndian>()?;
        let mtime = src.read_u32::<BigEndian>()?;
        let mut ext_buf = [0u8; 6];
        src.read_exact(&mut ext_buf)?;
        let ext_len = ext_buf.iter().position(|&b| b == 0).unwrap_or(ext_buf.len());
        let ext = String::from_utf8_lossy(&ext_buf[..ext_len]).into_owned();
        Ok(Self { status, size, crc32, mtime, ext })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_header() {
        let header = ChunkHeader {
            status: AllocStatus::Used,
            size: 4096,
            crc32: 0xDEAD_BEEF,
            mtime: 1_700_000_000,
            ext: "jpg".to_string(),
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, CHUNK_HEADER_LEN);
        let parsed = ChunkHeader::read(&mut &buf[..]).unwrap();
        assert_eq!(parsed.size, 4096);
        assert_eq!(parsed.ext, "jpg");
        assert_eq!(parsed.status, AllocStatus::Used);
    }
}
