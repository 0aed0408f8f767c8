use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A cursor into the primary's binary log: the log file name plus the byte
/// offset of the next frame to read.
///
/// Serialized as `{"Name": "...", "Pos": ...}`, the payload shape shared by
/// the file and KV position stores.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    #[serde(rename = "Name")]
    pub file: String,
    #[serde(rename = "Pos")]
    pub offset: u32,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, offset: u32) -> Self {
        BinlogPosition {
            file: file.into(),
            offset,
        }
    }

    /// The zero position: nothing recorded yet. The replication client treats
    /// it as "start from the server's current position".
    pub fn is_zero(&self) -> bool {
        self.file.is_empty()
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        // Binlog files are sequentially numbered using a .NNNNNN suffix and
        // share a common basename, so positions in different files compare by
        // suffix. Malformed names or differing basenames are incomparable.
        if self.file == other.file {
            return self.offset.partial_cmp(&other.offset);
        }

        let (basename, suffix) = self.file.rsplit_once('.')?;
        let (other_basename, other_suffix) = other.file.rsplit_once('.')?;

        if basename != other_basename {
            return None;
        }

        let suffix = suffix.parse::<u64>().ok()?;
        let other_suffix = other_suffix.parse::<u64>().ok()?;

        suffix.partial_cmp(&other_suffix)
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialized_payload_shape() {
        let pos = BinlogPosition::new("mysql-bin.000042", 917);
        let json = serde_json::to_string(&pos).unwrap();
        assert_eq!(json, r#"{"Name":"mysql-bin.000042","Pos":917}"#);

        let back: BinlogPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }

    #[test]
    fn orders_within_a_file() {
        let a = BinlogPosition::new("mysql-bin.000001", 4);
        let b = BinlogPosition::new("mysql-bin.000001", 917);
        assert!(a < b);
    }

    #[test]
    fn orders_across_files_by_suffix() {
        let a = BinlogPosition::new("mysql-bin.000009", 99999);
        let b = BinlogPosition::new("mysql-bin.000010", 4);
        assert!(a < b);
    }

    #[test]
    fn different_basenames_are_incomparable() {
        let a = BinlogPosition::new("mysql-bin.000001", 4);
        let b = BinlogPosition::new("other-bin.000002", 4);
        assert_eq!(a.partial_cmp(&b), None);
    }

    #[test]
    fn zero_position() {
        assert!(BinlogPosition::default().is_zero());
        assert!(!BinlogPosition::new("mysql-bin.000001", 0).is_zero());
    }
}
