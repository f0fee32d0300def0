//! Binlog record format (spec §4.6): one text line per operation,
//! `<unix-ts> <op-type> <logical-filename>[ <extra>]`.

use crate::error::BinlogError;

/// Operation letters mirrored from the original FastDFS binlog format,
/// kept single-character so a segment stays human-greppable. Each file
/// operation has a source and a replica variant (upper vs. lower case of
/// the same letter) so a reader can tell whether a record originated on
/// this node or arrived from a peer — replaying a replica record back out
/// to other peers would otherwise loop forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    SourceCreateFile,
    ReplicaCreateFile,
    SourceDeleteFile,
    ReplicaDeleteFile,
    SourceUpdateFile,
    ReplicaUpdateFile,
    SourceAppendFile,
    ReplicaAppendFile,
    SourceModifyFile,
    ReplicaModifyFile,
    SourceTruncateFile,
    ReplicaTruncateFile,
    SourceCreateLink,
    ReplicaCreateLink,
}

impl OpType {
    pub fn as_char(self) -> char {
        match self {
            OpType::SourceCreateFile => 'C',
            OpType::ReplicaCreateFile => 'c',
            OpType::SourceDeleteFile => 'D',
            OpType::ReplicaDeleteFile => 'd',
            OpType::SourceUpdateFile => 'U',
            OpType::ReplicaUpdateFile => 'u',
            OpType::SourceAppendFile => 'A',
            OpType::ReplicaAppendFile => 'a',
            OpType::SourceModifyFile => 'M',
            OpType::ReplicaModifyFile => 'm',
            OpType::SourceTruncateFile => 'T',
            OpType::ReplicaTruncateFile => 't',
            OpType::SourceCreateLink => 'L',
            OpType::ReplicaCreateLink => 'l',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'C' => OpType::SourceCreateFile,
            'c' => OpType::ReplicaCreateFile,
            'D' => OpType::SourceDeleteFile,
            'd' => OpType::ReplicaDeleteFile,
            'U' => OpType::SourceUpdateFile,
            'u' => OpType::ReplicaUpdateFile,
            'A' => OpType::SourceAppendFile,
            'a' => OpType::ReplicaAppendFile,
            'M' => OpType::SourceModifyFile,
            'm' => OpType::ReplicaModifyFile,
            'T' => OpType::SourceTruncateFile,
            't' => OpType::ReplicaTruncateFile,
            'L' => OpType::SourceCreateLink,
            'l' => OpType::ReplicaCreateLink,
            _ => return None,
        })
    }

    /// True for the `Source*` half: operations this node originated locally
    /// and must forward to peers.
    pub fn is_source(self) -> bool {
        !self.is_replica()
    }

    /// True for the `Replica*` half: operations this node applied on
    /// behalf of a peer and must never re-forward.
    pub fn is_replica(self) -> bool {
        matches!(
            self,
            OpType::ReplicaCreateFile
                | OpType::ReplicaDeleteFile
                | OpType::ReplicaUpdateFile
                | OpType::ReplicaAppendFile
                | OpType::ReplicaModifyFile
                | OpType::ReplicaTruncateFile
                | OpType::ReplicaCreateLink
        )
    }

    /// The `Replica*` counterpart of a `Source*` op, used when a peer's
    /// sync-* command is applied locally and re-logged so it can in turn be
    /// read (but not re-forwarded) by this node's own replication readers.
    pub fn as_replica(self) -> Self {
        match self {
            OpType::SourceCreateFile => OpType::ReplicaCreateFile,
            OpType::SourceDeleteFile => OpType::ReplicaDeleteFile,
            OpType::SourceUpdateFile => OpType::ReplicaUpdateFile,
            OpType::SourceAppendFile => OpType::ReplicaAppendFile,
            OpType::SourceModifyFile => OpType::ReplicaModifyFile,
            OpType::SourceTruncateFile => OpType::ReplicaTruncateFile,
            OpType::SourceCreateLink => OpType::ReplicaCreateLink,
            other => other,
        }
    }
}

/// A single parsed binlog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: u32,
    pub op: OpType,
    pub filename: String,
    /// Extra field: appended byte count for append/modify, remaining size
    /// for truncate, link target for link, nothing for the rest.
    pub extra: Option<String>,
}

impl Record {
    pub fn encode(&self) -> String {
        match &self.extra {
            Some(extra) => format!("{} {} {} {}\n", self.timestamp, self.op.as_char(), self.filename, extra),
            None => format!("{} {} {}\n", self.timestamp, self.op.as_char(), self.filename),
        }
    }

    pub fn parse(line: &str, segment: u64, offset: u64) -> Result<Self, BinlogError> {
        let line = line.trim_end_matches('\n');
        let mut parts = line.splitn(4, ' ');
        let timestamp: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(BinlogError::Corrupt { segment, offset, reason: "missing timestamp" })?;
        let op_char: char = parts
            .next()
            .and_then(|s| s.chars().next())
            .ok_or(BinlogError::Corrupt { segment, offset, reason: "missing op type" })?;
        let op = OpType::from_char(op_char)
            .ok_or(BinlogError::Corrupt { segment, offset, reason: "unknown op type" })?;
        let filename = parts
            .next()
            .ok_or(BinlogError::Corrupt { segment, offset, reason: "missing filename" })?
            .to_string();
        let extra = parts.next().map(|s| s.to_string());
        Ok(Self { timestamp, op, filename, extra })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_with_and_without_extra() {
        let r1 = Record { timestamp: 100, op: OpType::SourceCreateFile, filename: "M00/00/00/a.txt".into(), extra: None };
        let parsed = Record::parse(&r1.encode(), 0, 0).unwrap();
        assert_eq!(parsed, r1);

        let r2 = Record {
            timestamp: 101,
            op: OpType::SourceAppendFile,
            filename: "M00/00/00/a.txt".into(),
            extra: Some("128".into()),
        };
        let parsed2 = Record::parse(&r2.encode(), 0, 0).unwrap();
        assert_eq!(parsed2, r2);
    }

    #[test]
    fn rejects_unknown_op_type() {
        assert!(matches!(
            Record::parse("100 Z M00/00/00/a.txt", 0, 0),
            Err(BinlogError::Corrupt { reason: "unknown op type", .. })
        ));
    }

    #[test]
    fn source_and_replica_letters_are_case_pairs() {
        assert_eq!(OpType::SourceCreateFile.as_char(), 'C');
        assert_eq!(OpType::ReplicaCreateFile.as_char(), 'c');
        assert!(OpType::SourceCreateFile.is_source());
        assert!(OpType::ReplicaCreateFile.is_replica());
        assert_eq!(OpType::SourceCreateFile.as_replica(), OpType::ReplicaCreateFile);
    }
}
