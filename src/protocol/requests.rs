//! Request body layouts (spec §6). One struct per command, each with a
//! `parse` constructor reading from an already-buffered body. Field order
//! matches the wire layouts listed in spec §6 exactly.

use std::io::Read;

use crate::error::ProtocolError;
use crate::protocol::primitive::{
    read_exact_vec, read_fixed_str, read_u64, read_u8, FILE_EXT_NAME_LEN, FILE_PREFIX_LEN,
    GROUP_NAME_LEN,
};

#[derive(Debug)]
pub struct UploadFile {
    pub store_path_index: u8,
    pub file_size: u64,
    pub ext: String,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let store_path_index = read_u8(src)?;
        let file_size = read_u64(src)?;
        let ext = read_fixed_str(src, FILE_EXT_NAME_LEN)?;
        let data = read_exact_vec(src, file_size as usize)?;
        Ok(Self { store_path_index, file_size, ext, data })
    }
}

/// Identical wire layout to [`UploadFile`]; the receiver flags the result as
/// an appender file (spec §6).
pub type UploadAppenderFile = UploadFile;

#[derive(Debug)]
pub struct UploadSlaveFile {
    pub master_filename: String,
    pub file_size: u64,
    pub prefix: String,
    pub ext: String,
    pub data: Vec<u8>,
}

impl UploadSlaveFile {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let master_len = read_u64(src)? as usize;
        let file_size = read_u64(src)?;
        let prefix = read_fixed_str(src, FILE_PREFIX_LEN)?;
        let ext = read_fixed_str(src, FILE_EXT_NAME_LEN)?;
        let master_filename = String::from_utf8(read_exact_vec(src, master_len)?)
            .map_err(|_| ProtocolError::MalformedField("master_filename"))?;
        let data = read_exact_vec(src, file_size as usize)?;
        Ok(Self { master_filename, file_size, prefix, ext, data })
    }
}

#[derive(Debug)]
pub struct DownloadFile {
    pub offset: u64,
    pub length: u64,
    pub group: String,
    pub filename: String,
}

impl DownloadFile {
    pub fn parse(src: &mut impl Read, remaining_filename_len: usize) -> Result<Self, ProtocolError> {
        let offset = read_u64(src)?;
        let length = read_u64(src)?;
        let group = read_fixed_str(src, GROUP_NAME_LEN)?;
        let filename = String::from_utf8(read_exact_vec(src, remaining_filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        Ok(Self { offset, length, group, filename })
    }
}

#[derive(Debug)]
pub struct AppendFile {
    pub file_size: u64,
    pub appender_filename: String,
    pub data: Vec<u8>,
}

impl AppendFile {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let appender_len = read_u64(src)? as usize;
        let file_size = read_u64(src)?;
        let appender_filename = String::from_utf8(read_exact_vec(src, appender_len)?)
            .map_err(|_| ProtocolError::MalformedField("appender_filename"))?;
        let data = read_exact_vec(src, file_size as usize)?;
        Ok(Self { file_size, appender_filename, data })
    }
}

#[derive(Debug)]
pub struct ModifyFile {
    pub offset: u64,
    pub file_size: u64,
    pub appender_filename: String,
    pub data: Vec<u8>,
}

impl ModifyFile {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let appender_len = read_u64(src)? as usize;
        let offset = read_u64(src)?;
        let file_size = read_u64(src)?;
        let appender_filename = String::from_utf8(read_exact_vec(src, appender_len)?)
            .map_err(|_| ProtocolError::MalformedField("appender_filename"))?;
        let data = read_exact_vec(src, file_size as usize)?;
        Ok(Self { offset, file_size, appender_filename, data })
    }
}

#[derive(Debug)]
pub struct TruncateFile {
    pub remain_size: u64,
    pub appender_filename: String,
}

impl TruncateFile {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let appender_len = read_u64(src)? as usize;
        let remain_size = read_u64(src)?;
        let appender_filename = String::from_utf8(read_exact_vec(src, appender_len)?)
            .map_err(|_| ProtocolError::MalformedField("appender_filename"))?;
        Ok(Self { remain_size, appender_filename })
    }
}

#[derive(Debug)]
pub struct DeleteFile {
    pub group: String,
    pub filename: String,
}

impl DeleteFile {
    pub fn parse(src: &mut impl Read, remaining_filename_len: usize) -> Result<Self, ProtocolError> {
        let group = read_fixed_str(src, GROUP_NAME_LEN)?;
        let filename = String::from_utf8(read_exact_vec(src, remaining_filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        Ok(Self { group, filename })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOp {
    Overwrite,
    Merge,
}

#[derive(Debug)]
pub struct SetMetadata {
    pub op: MetadataOp,
    pub group: String,
    pub filename: String,
    pub meta_bytes: Vec<u8>,
}

impl SetMetadata {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let fname_len = read_u64(src)? as usize;
        let meta_len = read_u64(src)? as usize;
        let op_flag = read_u8(src)?;
        let op = match op_flag {
            b'O' => MetadataOp::Overwrite,
            b'M' => MetadataOp::Merge,
            _ => return Err(ProtocolError::MalformedField("op_flag")),
        };
        let group = read_fixed_str(src, GROUP_NAME_LEN)?;
        let filename = String::from_utf8(read_exact_vec(src, fname_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        let meta_bytes = read_exact_vec(src, meta_len)?;
        Ok(Self { op, group, filename, meta_bytes })
    }
}

#[derive(Debug)]
pub struct GetMetadata {
    pub group: String,
    pub filename: String,
}

impl GetMetadata {
    pub fn parse(src: &mut impl Read, remaining_filename_len: usize) -> Result<Self, ProtocolError> {
        let group = read_fixed_str(src, GROUP_NAME_LEN)?;
        let filename = String::from_utf8(read_exact_vec(src, remaining_filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        Ok(Self { group, filename })
    }
}

pub type QueryFileInfo = GetMetadata;

#[derive(Debug)]
pub struct CreateLink {
    pub master_filename: String,
    pub src_filename: String,
    pub src_sig: Vec<u8>,
    pub group: String,
    pub prefix: String,
    pub ext: String,
}

impl CreateLink {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let master_len = read_u64(src)? as usize;
        let src_len = read_u64(src)? as usize;
        let sig_len = read_u64(src)? as usize;
        let group = read_fixed_str(src, GROUP_NAME_LEN)?;
        let prefix = read_fixed_str(src, FILE_PREFIX_LEN)?;
        let ext = read_fixed_str(src, FILE_EXT_NAME_LEN)?;
        let master_filename = String::from_utf8(read_exact_vec(src, master_len)?)
            .map_err(|_| ProtocolError::MalformedField("master_filename"))?;
        let src_filename = String::from_utf8(read_exact_vec(src, src_len)?)
            .map_err(|_| ProtocolError::MalformedField("src_filename"))?;
        let src_sig = read_exact_vec(src, sig_len)?;
        Ok(Self { master_filename, src_filename, src_sig, group, prefix, ext })
    }
}

/// Sync-* requests carry the same op-space plus a source timestamp ahead of
/// the group field (spec §6).
#[derive(Debug)]
pub struct SyncHeader {
    pub source_timestamp: u32,
}

impl SyncHeader {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let mut buf = [0u8; 4];
        src.read_exact(&mut buf).map_err(ProtocolError::Io)?;
        Ok(Self { source_timestamp: u32::from_be_bytes(buf) })
    }
}

/// Body shared by SYNC_CREATE_FILE/SYNC_UPDATE_FILE/SYNC_APPEND_FILE (spec
/// §4.7, §6): a source timestamp ahead of the same filename+content layout
/// the local write-path commands use, since a peer replays bytes at the
/// exact logical filename the source already generated.
#[derive(Debug)]
pub struct SyncFileContent {
    pub source_timestamp: u32,
    pub filename: String,
    pub data: Vec<u8>,
}

impl SyncFileContent {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let header = SyncHeader::parse(src)?;
        let filename_len = read_u64(src)? as usize;
        let data_len = read_u64(src)? as usize;
        let filename = String::from_utf8(read_exact_vec(src, filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        let data = read_exact_vec(src, data_len)?;
        Ok(Self { source_timestamp: header.source_timestamp, filename, data })
    }
}

/// Body for SYNC_MODIFY_FILE: [`SyncFileContent`] plus the write offset.
#[derive(Debug)]
pub struct SyncModifyContent {
    pub source_timestamp: u32,
    pub filename: String,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SyncModifyContent {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let header = SyncHeader::parse(src)?;
        let filename_len = read_u64(src)? as usize;
        let offset = read_u64(src)?;
        let data_len = read_u64(src)? as usize;
        let filename = String::from_utf8(read_exact_vec(src, filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        let data = read_exact_vec(src, data_len)?;
        Ok(Self { source_timestamp: header.source_timestamp, filename, offset, data })
    }
}

/// Body for SYNC_TRUNCATE_FILE.
#[derive(Debug)]
pub struct SyncTruncate {
    pub source_timestamp: u32,
    pub filename: String,
    pub remain_size: u64,
}

impl SyncTruncate {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let header = SyncHeader::parse(src)?;
        let filename_len = read_u64(src)? as usize;
        let remain_size = read_u64(src)?;
        let filename = String::from_utf8(read_exact_vec(src, filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        Ok(Self { source_timestamp: header.source_timestamp, filename, remain_size })
    }
}

/// Body for SYNC_DELETE_FILE.
#[derive(Debug)]
pub struct SyncDelete {
    pub source_timestamp: u32,
    pub filename: String,
}

impl SyncDelete {
    pub fn parse(src: &mut impl Read, remaining_filename_len: usize) -> Result<Self, ProtocolError> {
        let header = SyncHeader::parse(src)?;
        let filename = String::from_utf8(read_exact_vec(src, remaining_filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        Ok(Self { source_timestamp: header.source_timestamp, filename })
    }
}

/// Body for SYNC_CREATE_LINK: the link's own logical filename plus the
/// master filename it points at.
#[derive(Debug)]
pub struct SyncCreateLink {
    pub source_timestamp: u32,
    pub filename: String,
    pub master_filename: String,
}

impl SyncCreateLink {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let header = SyncHeader::parse(src)?;
        let filename_len = read_u64(src)? as usize;
        let master_len = read_u64(src)? as usize;
        let filename = String::from_utf8(read_exact_vec(src, filename_len)?)
            .map_err(|_| ProtocolError::MalformedField("filename"))?;
        let master_filename = String::from_utf8(read_exact_vec(src, master_len)?)
            .map_err(|_| ProtocolError::MalformedField("master_filename"))?;
        Ok(Self { source_timestamp: header.source_timestamp, filename, master_filename })
    }
}

/// Body for REPORT_SERVER_ID: just the reporting peer's id, taking up the
/// whole remaining body.
#[derive(Debug)]
pub struct ReportServerId {
    pub server_id: String,
}

impl ReportServerId {
    pub fn parse(src: &mut impl Read, remaining_len: usize) -> Result<Self, ProtocolError> {
        let server_id = String::from_utf8(read_exact_vec(src, remaining_len)?)
            .map_err(|_| ProtocolError::MalformedField("server_id"))?;
        Ok(Self { server_id })
    }
}

/// Body for TRUNK_ALLOC: a store path and a requested chunk size (spec
/// §4.5's allocation handshake, scoped here to this node's own local
/// allocator rather than a distributed trunk-server election).
#[derive(Debug)]
pub struct TrunkAllocRequest {
    pub store_path_index: u8,
    pub size: u64,
}

impl TrunkAllocRequest {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let store_path_index = read_u8(src)?;
        let size = read_u64(src)?;
        Ok(Self { store_path_index, size })
    }
}

/// Body shared by TRUNK_CONFIRM and TRUNK_FREE: a store path and a chunk
/// location.
#[derive(Debug)]
pub struct TrunkChunkRequest {
    pub store_path_index: u8,
    pub trunk_id: u64,
    pub offset: u64,
}

impl TrunkChunkRequest {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let store_path_index = read_u8(src)?;
        let trunk_id = read_u64(src)?;
        let offset = read_u64(src)?;
        Ok(Self { store_path_index, trunk_id, offset })
    }
}

/// Body shared by TRUNK_SYNC_BINLOG and FETCH_ONE_PATH_BINLOG: a store path
/// and the byte offset to resume from.
#[derive(Debug)]
pub struct FetchBinlogRequest {
    pub store_path_index: u8,
    pub offset: u64,
}

impl FetchBinlogRequest {
    pub fn parse(src: &mut impl Read) -> Result<Self, ProtocolError> {
        let store_path_index = read_u8(src)?;
        let offset = read_u64(src)?;
        Ok(Self { store_path_index, offset })
    }
}
