//! Response body layouts (spec §6).

use std::io::{self, Write};

use crate::protocol::primitive::{write_fixed_str, write_u64, GROUP_NAME_LEN};

#[derive(Debug)]
pub struct UploadFileResponse {
    pub group: String,
    pub logical_filename: String,
}

impl UploadFileResponse {
    pub fn write(&self, dst: &mut impl Write) -> io::Result<()> {
        write_fixed_str(dst, &self.group, GROUP_NAME_LEN)?;
        dst.write_all(self.logical_filename.as_bytes())
    }
}

pub type CreateLinkResponse = UploadFileResponse;

#[derive(Debug)]
pub struct QueryFileInfoResponse {
    pub size: u64,
    pub mtime: u64,
    pub crc32: u64,
    pub source_ip: String,
}

impl QueryFileInfoResponse {
    pub fn write(&self, dst: &mut impl Write) -> io::Result<()> {
        write_u64(dst, self.size)?;
        write_u64(dst, self.mtime)?;
        write_u64(dst, self.crc32)?;
        write_fixed_str(dst, &self.source_ip, 16)
    }
}

/// `DOWNLOAD_FILE` response body is just the raw bytes; no wrapper needed.
pub struct DownloadFileResponse;

/// `GET_METADATA` response body is the packed metadata sidecar bytes
/// (see [`crate::metadata`]); no separate framing beyond the header.
pub struct GetMetadataResponse;

/// `TRUNK_ALLOC` response: where the reservation landed.
#[derive(Debug)]
pub struct TrunkAllocResponse {
    pub trunk_id: u64,
    pub offset: u64,
}

impl TrunkAllocResponse {
    pub fn write(&self, dst: &mut impl Write) -> io::Result<()> {
        write_u64(dst, self.trunk_id)?;
        write_u64(dst, self.offset)
    }
}

/// `TRUNK_SYNC_BINLOG`/`FETCH_ONE_PATH_BINLOG` response bodies are raw
/// binlog bytes from the requested offset onward; no wrapper needed.
pub struct FetchBinlogResponse;
