//! The decoder-facing model of a binlog frame.
//!
//! The replication client parses the wire protocol (via `mysql_common`) and
//! lowers each raw event into a [`BinlogFrame`]; everything downstream of the
//! client works on this model only, which keeps the routing and position
//! logic testable without a live server.

/// Header fields shared by every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Seconds since epoch, as stamped by the primary.
    pub timestamp: u32,
    /// Offset of the next frame within the current log file. Zero for frames
    /// the primary does not position (e.g. the format description).
    pub log_pos: u32,
}

/// One row as transmitted by the primary: values ordered by column position.
pub type Row = Vec<serde_json::Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum FrameBody {
    /// Maps a table id to its definition; precedes every row frame.
    TableMap { schema: String, table: String },

    /// `INSERT`: each row is the inserted image.
    WriteRows {
        schema: String,
        table: String,
        rows: Vec<Row>,
    },

    /// `UPDATE`: rows alternate before-image, after-image.
    UpdateRows {
        schema: String,
        table: String,
        rows: Vec<Row>,
    },

    /// `DELETE`: each row is the deleted image.
    DeleteRows {
        schema: String,
        table: String,
        rows: Vec<Row>,
    },

    /// A statement, DDL included. `schema` is the default database the
    /// statement ran against.
    Query { schema: String, query: String },

    /// Transition to a new log file. `position` comes from the event body;
    /// the header position of a rotate is not meaningful.
    Rotate { next_file: String, position: u32 },

    /// Transaction commit.
    Xid,

    /// Anything the engine does not act on (format description, heartbeats,
    /// GTIDs, ...).
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinlogFrame {
    pub header: FrameHeader,
    pub body: FrameBody,
}

impl BinlogFrame {
    pub fn new(header: FrameHeader, body: FrameBody) -> Self {
        BinlogFrame { header, body }
    }
}
