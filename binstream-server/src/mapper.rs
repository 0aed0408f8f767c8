use std::collections::BTreeMap;

use binstream_client::{StreamEvent, StreamEventColumn};
use binstream_replication::DataChangeEvent;

/// A mapped event ready for publication.
#[derive(Clone, Debug, PartialEq)]
pub enum MappedEvent {
    Stream(StreamEvent),
    Raw(DataChangeEvent),
}

impl MappedEvent {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            MappedEvent::Stream(event) => serde_json::to_value(event),
            MappedEvent::Raw(event) => serde_json::to_value(event),
        }
    }
}

/// Shape transformation applied to a [`DataChangeEvent`] before publication,
/// chosen once at pipeline registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mapper {
    /// Expand to one column-keyed [`StreamEvent`] per changed row.
    #[default]
    Stream,
    /// Pass the decoded event through unchanged.
    Raw,
}

impl Mapper {
    pub fn map_event(&self, dce: &DataChangeEvent) -> Vec<MappedEvent> {
        match self {
            Mapper::Raw => vec![MappedEvent::Raw(dce.clone())],
            Mapper::Stream => dce
                .records
                .iter()
                .map(|record| {
                    let mut columns = BTreeMap::new();
                    for (idx, column) in dce.columns.iter().enumerate() {
                        let before = record.before.get(idx).map(value_string).unwrap_or_default();
                        let after = record.after.get(idx).map(value_string).unwrap_or_default();
                        columns.insert(
                            column.name.clone(),
                            StreamEventColumn {
                                data_type: column.data_type.clone(),
                                before,
                                after,
                            },
                        );
                    }
                    MappedEvent::Stream(StreamEvent {
                        timestamp: dce.timestamp,
                        schema: dce.schema.clone(),
                        table: dce.table.clone(),
                        kind: dce.kind,
                        columns,
                    })
                })
                .collect(),
        }
    }
}

/// The published string form of a row value. Strings pass through unquoted,
/// null maps to the empty string like a missing side does.
fn value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
