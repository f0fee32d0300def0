//! Command byte space (spec §6). Grouped the way the dispatcher groups
//! handlers in spec §4.2: read-path, write-path, replication-path,
//! management.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    // read-path
    DownloadFile = 14,
    GetMetadata = 15,
    QueryFileInfo = 22,
    // write-path
    UploadFile = 11,
    UploadSlaveFile = 21,
    UploadAppenderFile = 23,
    AppendFile = 24,
    SetMetadata = 13,
    DeleteFile = 12,
    ModifyFile = 34,
    TruncateFile = 36,
    CreateLink = 39,
    // replication-path (sync-*, mirrors the write-path op space)
    SyncCreateFile = 111,
    SyncUpdateFile = 112,
    SyncAppendFile = 113,
    SyncModifyFile = 114,
    SyncTruncateFile = 115,
    SyncDeleteFile = 116,
    SyncCreateLink = 117,
    // management
    ActiveTest = 8,
    ReportServerId = 76,
    TrunkAlloc = 83,
    TrunkConfirm = 84,
    TrunkFree = 85,
    TrunkSyncBinlog = 86,
    FetchOnePathBinlog = 87,
}

impl Command {
    pub fn from_byte(byte: u8) -> Result<Command, ProtocolError> {
        FromPrimitive::from_u8(byte).ok_or(ProtocolError::UnknownCommand(byte))
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn group(self) -> CommandGroup {
        use Command::*;
        match self {
            DownloadFile | GetMetadata | QueryFileInfo => CommandGroup::Read,
            UploadFile | UploadSlaveFile | UploadAppenderFile | AppendFile | SetMetadata
            | DeleteFile | ModifyFile | TruncateFile | CreateLink => CommandGroup::Write,
            SyncCreateFile | SyncUpdateFile | SyncAppendFile | SyncModifyFile
            | SyncTruncateFile | SyncDeleteFile | SyncCreateLink => CommandGroup::Replication,
            ActiveTest | ReportServerId | TrunkAlloc | TrunkConfirm | TrunkFree
            | TrunkSyncBinlog | FetchOnePathBinlog => CommandGroup::Management,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    Read,
    Write,
    Replication,
    Management,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_known_bytes() {
        assert_eq!(Command::from_byte(11).unwrap(), Command::UploadFile);
        assert_eq!(Command::UploadFile.as_byte(), 11);
        assert_eq!(Command::UploadFile.group(), CommandGroup::Write);
    }

    #[test]
    fn rejects_unknown_byte() {
        assert!(matches!(Command::from_byte(250), Err(ProtocolError::UnknownCommand(250))));
    }
}
