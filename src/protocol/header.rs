//! Fixed 10-byte message header shared by every command (spec §4.1, §6).
//!
//! `body_len:u64_be, cmd:u8, status:u8`. `status` is always 0 in requests; in
//! responses it carries the error code described in spec §7.

use std::io::{self, Read, Write};

use crate::error::ProtocolError;
use crate::protocol::primitive::{read_u64, read_u8, write_u64, write_u8};

pub const HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub body_len: u64,
    pub cmd: u8,
    pub status: u8,
}

impl Header {
    pub fn request(cmd: u8, body_len: u64) -> Self {
        Self { body_len, cmd, status: 0 }
    }

    pub fn response(cmd: u8, body_len: u64, status: u8) -> Self {
        Self { body_len, cmd, status }
    }

    /// Parses a header, rejecting any body length above `max_body_len`
    /// before the caller ever reads the body (spec §4.1 oversize rejection).
    pub fn parse(src: &mut impl Read, max_body_len: usize) -> Result<Self, ProtocolError> {
        let body_len = read_u64(src)?;
        let cmd = read_u8(src)?;
        let status = read_u8(src)?;
        if body_len > max_body_len as u64 {
            return Err(ProtocolError::BodyTooLarge { declared: body_len, limit: max_body_len });
        }
        Ok(Self { body_len, cmd, status })
    }

    pub fn write(&self, dst: &mut impl Write) -> io::Result<()> {
        write_u64(dst, self.body_len)?;
        write_u8(dst, self.cmd)?;
        write_u8(dst, self.status)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut cursor = &mut buf[..];
        self.write(&mut cursor).expect("writing to a fixed-size slice cannot fail");
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let header = Header::response(11, 42, 0);
        let bytes = header.to_bytes();
        let parsed = Header::parse(&mut Cursor::new(bytes), 1024).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn oversize_body_rejected() {
        let header = Header::request(11, 10_000);
        let bytes = header.to_bytes();
        let err = Header::parse(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::BodyTooLarge { declared: 10_000, limit: 1024 }));
    }
}
