use std::sync::Arc;

use binstream_client::ChangeType;
use serde::Serialize;
use tracing::{debug, trace};

use crate::catalog::{ColumnInfo, SchemaProvider, TableCatalog, TableInfo};
use crate::error::ReplicationResult;
use crate::filter::SchemaFilter;
use crate::frame::{BinlogFrame, FrameBody, FrameHeader, Row};
use crate::position::BinlogPosition;

/// One changed row: value tuples aligned positionally with the event's
/// columns. Inserts carry only `after`, deletes only `before`, updates both.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RowRecord {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before: Row,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after: Row,
}

/// The canonical decoded record of one row-event frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataChangeEvent {
    pub timestamp: u32,
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeType,
    /// Column metadata as of the row-event time.
    pub columns: Vec<ColumnInfo>,
    pub records: Vec<RowRecord>,
}

/// What one frame produced: possibly an event for the handlers, possibly a
/// position the reader should persist once the handlers have succeeded.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub event: Option<DataChangeEvent>,
    pub checkpoint: Option<BinlogPosition>,
}

impl DecodeOutcome {
    fn none() -> Self {
        DecodeOutcome::default()
    }
}

/// Translates [`BinlogFrame`]s into [`DataChangeEvent`]s while tracking the
/// replication position.
///
/// Owned by the single reader task, like the catalog it wraps. Positions are
/// emitted as checkpoints only on rotate, query and xid frames, so that a
/// restart never lands in the middle of a transaction's row frames.
pub struct EventDecoder<P> {
    catalog: TableCatalog<P>,
    filter: Arc<SchemaFilter>,
    /// Name of the log file the stream is currently reading. Updated by
    /// rotate frames; frame headers only carry the offset.
    file: String,
}

impl<P: SchemaProvider> EventDecoder<P> {
    pub fn new(catalog: TableCatalog<P>, filter: Arc<SchemaFilter>, start: &BinlogPosition) -> Self {
        EventDecoder {
            catalog,
            filter,
            file: start.file.clone(),
        }
    }

    pub async fn decode(&mut self, frame: BinlogFrame) -> ReplicationResult<DecodeOutcome> {
        let BinlogFrame { header, body } = frame;

        match body {
            FrameBody::TableMap { schema, table } => {
                self.catalog.invalidate(&schema, &table);
                Ok(DecodeOutcome::none())
            }

            FrameBody::WriteRows {
                schema,
                table,
                rows,
            } => {
                self.row_event(header, schema, table, ChangeType::Insert, rows)
                    .await
            }

            FrameBody::UpdateRows {
                schema,
                table,
                rows,
            } => {
                self.row_event(header, schema, table, ChangeType::Update, rows)
                    .await
            }

            FrameBody::DeleteRows {
                schema,
                table,
                rows,
            } => {
                self.row_event(header, schema, table, ChangeType::Delete, rows)
                    .await
            }

            FrameBody::Query { schema, query } => {
                if let Some(table) = alter_table_target(&query) {
                    debug!(schema, table, "ALTER TABLE observed, evicting table metadata");
                    self.catalog.invalidate(&schema, table);
                }
                Ok(self.checkpoint_at(header.log_pos))
            }

            FrameBody::Rotate {
                next_file,
                position,
            } => {
                self.file = next_file;
                Ok(self.checkpoint_at(position))
            }

            FrameBody::Xid => Ok(self.checkpoint_at(header.log_pos)),

            FrameBody::Other => Ok(DecodeOutcome::none()),
        }
    }

    async fn row_event(
        &mut self,
        header: FrameHeader,
        schema: String,
        table: String,
        kind: ChangeType,
        rows: Vec<Row>,
    ) -> ReplicationResult<DecodeOutcome> {
        if !self.filter.includes(&schema) {
            trace!(schema, table, "schema filtered out, skipping row decoding");
            return Ok(DecodeOutcome::none());
        }

        let TableInfo { columns, .. } = self.catalog.table_info(&schema, &table).await?;

        let records = match kind {
            ChangeType::Insert => rows
                .into_iter()
                .map(|row| RowRecord {
                    before: Vec::new(),
                    after: row,
                })
                .collect(),
            ChangeType::Delete => rows
                .into_iter()
                .map(|row| RowRecord {
                    before: row,
                    after: Vec::new(),
                })
                .collect(),
            // Rows alternate before-image, after-image. A trailing unpaired
            // row becomes a record with an empty after side.
            ChangeType::Update => rows
                .chunks(2)
                .map(|pair| RowRecord {
                    before: pair[0].clone(),
                    after: pair.get(1).cloned().unwrap_or_default(),
                })
                .collect(),
        };

        Ok(DecodeOutcome {
            event: Some(DataChangeEvent {
                timestamp: header.timestamp,
                schema,
                table,
                kind,
                columns,
                records,
            }),
            checkpoint: None,
        })
    }

    fn checkpoint_at(&self, offset: u32) -> DecodeOutcome {
        DecodeOutcome {
            event: None,
            checkpoint: Some(BinlogPosition::new(self.file.clone(), offset)),
        }
    }
}

/// Extract the target table of an `ALTER TABLE` statement, if `query` is one.
///
/// Keywords are matched case-insensitively with arbitrary whitespace between
/// them; the table name is the following run of identifier characters
/// (letters, digits, underscore), terminated by the first character outside
/// that set. Anything else, `CREATE TABLE` included, yields `None`.
pub fn alter_table_target(query: &str) -> Option<&str> {
    let rest = strip_keyword(query, "alter")?;
    let rest = strip_keyword(rest, "table")?;

    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());

    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Strip `keyword` (case-insensitive) plus its leading whitespace, requiring
/// at least one whitespace character to follow it.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    if bytes.len() <= keyword.len()
        || !bytes[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
        || !bytes[keyword.len()].is_ascii_whitespace()
    {
        return None;
    }
    // The matched prefix is pure ASCII, so this index is a char boundary.
    Some(&s[keyword.len()..])
}
