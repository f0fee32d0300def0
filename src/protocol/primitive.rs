//! Primitive wire-format readers/writers shared by every request and
//! response body (spec §6).
//!
//! FastDFS fields are big-endian fixed-width integers and fixed-length,
//! NUL-padded byte strings (group names, extensions, prefixes). This mirrors
//! the teacher's `parser::primitive` helpers, adapted from XDR alignment
//! rules to FastDFS's simpler fixed-width framing.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

pub const GROUP_NAME_LEN: usize = 16;
pub const FILE_EXT_NAME_LEN: usize = 6;
pub const FILE_PREFIX_LEN: usize = 16;

pub fn read_u8(src: &mut impl Read) -> Result<u8, ProtocolError> {
    src.read_u8().map_err(ProtocolError::Io)
}

pub fn read_u64(src: &mut impl Read) -> Result<u64, ProtocolError> {
    src.read_u64::<BigEndian>().map_err(ProtocolError::Io)
}

pub fn write_u8(dst: &mut impl Write, value: u8) -> io::Result<()> {
    dst.write_u8(value)
}

pub fn write_u64(dst: &mut impl Write, value: u64) -> io::Result<()> {
    dst.write_u64::<BigEndian>(value)
}

/// Reads a fixed-size, NUL-padded field and trims the padding.
pub fn read_fixed_str(src: &mut impl Read, len: usize) -> Result<String, ProtocolError> {
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(ProtocolError::Io)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8(buf[..end].to_vec())
        .map_err(|_| ProtocolError::MalformedField("non-utf8 fixed string"))
}

/// Writes a fixed-size, NUL-padded field, truncating `value` if it overruns.
pub fn write_fixed_str(dst: &mut impl Write, value: &str, len: usize) -> io::Result<()> {
    let mut buf = vec![0u8; len];
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(len);
    buf[..copy_len].copy_from_slice(&bytes[..copy_len]);
    dst.write_all(&buf)
}

/// Reads exactly `len` bytes, erroring rather than short-reading.
pub fn read_exact_vec(src: &mut impl Read, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(ProtocolError::Io)?;
    Ok(buf)
}
