//! Types shared between the binstream server and services consuming its
//! published events.
//!
//! A consumer deserializes [`StreamEvent`]s from the stream it subscribed to,
//! and describes the routing it wants with an [`ApiPipeline`].

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The kind of row change carried by an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeType {
    /// `INSERT`
    #[serde(rename = "INS")]
    Insert,
    /// `UPDATE`
    #[serde(rename = "UPD")]
    Update,
    /// `DELETE`
    #[serde(rename = "DEL")]
    Delete,
}

impl ChangeType {
    /// The wire token for this change type, as it appears in published events
    /// and in pipeline type sets.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INS",
            ChangeType::Update => "UPD",
            ChangeType::Delete => "DEL",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after state of a single column within a [`StreamEvent`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEventColumn {
    #[serde(rename = "dataType")]
    pub data_type: String,
    pub before: String,
    pub after: String,
}

/// The externalized shape of one changed row.
///
/// A single binlog row event touching N rows expands to N `StreamEvent`s, each
/// keyed by column name. Missing sides (`before` of an insert, `after` of a
/// delete) are empty strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub timestamp: u32,
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeType,
    /// Keyed by column name.
    pub columns: BTreeMap<String, StreamEventColumn>,
}

/// Extra filtering conditions attached to a pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Only dispatch update events that change at least one of these columns.
    /// Empty means unconditional.
    #[serde(rename = "columnChanged", default)]
    pub column_changed: Vec<String>,
}

/// The admin-facing description of a routing rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPipeline {
    /// Schema name pattern.
    pub schema: String,
    /// Table name pattern.
    pub table: String,
    /// Event types: INS, UPD, DEL.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Destination stream name.
    pub stream: String,
    /// Extra filtering conditions.
    #[serde(default)]
    pub condition: Condition,
}

/// Compile a set of event types into the canonical anchored alternation used
/// by the server, e.g. `["UPD", "INS", "UPD"]` becomes `^(INS|UPD)$`.
///
/// Types are deduplicated and sorted so that equal sets always compile to the
/// same string. An empty set compiles to an empty string (matches any type).
pub fn event_type_regex(types: &[String]) -> String {
    if types.is_empty() {
        return String::new();
    }
    let mut types: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    types.sort_unstable();
    types.dedup();
    format!("^({})$", types.join("|"))
}

/// Recover the event type set from its canonical regex form.
///
/// Returns `None` when the string is not in the `^(T1|T2|…)$` shape produced
/// by [`event_type_regex`].
pub fn parse_event_type_regex(s: &str) -> Option<Vec<String>> {
    // Compiling a literal pattern cannot fail.
    let re = Regex::new(r"^\^\(([^\)]*)\)\$$").ok()?;
    let caps = re.captures(s)?;
    Some(
        caps.get(1)?
            .as_str()
            .split('|')
            .map(|t| t.to_string())
            .collect(),
    )
}
