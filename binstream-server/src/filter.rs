use binstream_client::{ChangeType, Condition};
use itertools::Itertools;

use crate::mapper::MappedEvent;

/// Per-pipeline event filter, chosen once at registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    /// Accept everything.
    PassAll,
    /// Accept update events only when one of these columns actually changed.
    /// Non-update events pass unconditionally.
    ColumnChanged(Vec<String>),
}

impl EventFilter {
    pub fn for_condition(condition: &Condition) -> Vec<EventFilter> {
        if condition.column_changed.is_empty() {
            vec![EventFilter::PassAll]
        } else {
            vec![EventFilter::ColumnChanged(
                condition.column_changed.iter().cloned().unique().collect(),
            )]
        }
    }

    pub fn accepts(&self, event: &MappedEvent) -> bool {
        match self {
            EventFilter::PassAll => true,
            EventFilter::ColumnChanged(columns) => match event {
                MappedEvent::Stream(event) => {
                    if event.kind != ChangeType::Update {
                        return true;
                    }
                    columns.iter().any(|name| {
                        event
                            .columns
                            .get(name)
                            .is_some_and(|column| column.before != column.after)
                    })
                }
                // The raw shape carries positional tuples, not named columns.
                MappedEvent::Raw(_) => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use binstream_client::{StreamEvent, StreamEventColumn};

    use super::*;

    fn stream_event(kind: ChangeType, columns: &[(&str, &str, &str)]) -> MappedEvent {
        let columns: BTreeMap<String, StreamEventColumn> = columns
            .iter()
            .map(|(name, before, after)| {
                (
                    name.to_string(),
                    StreamEventColumn {
                        data_type: "varchar".to_string(),
                        before: before.to_string(),
                        after: after.to_string(),
                    },
                )
            })
            .collect();
        MappedEvent::Stream(StreamEvent {
            timestamp: 0,
            schema: "app".to_string(),
            table: "users".to_string(),
            kind,
            columns,
        })
    }

    #[test]
    fn empty_condition_accepts_everything() {
        let filters = EventFilter::for_condition(&Condition::default());
        assert_eq!(filters, vec![EventFilter::PassAll]);
        assert!(filters[0].accepts(&stream_event(ChangeType::Update, &[("email", "a", "a")])));
    }

    #[test]
    fn changed_column_accepts() {
        let filter = EventFilter::ColumnChanged(vec!["email".to_string()]);
        assert!(filter.accepts(&stream_event(ChangeType::Update, &[("email", "a", "b")])));
    }

    #[test]
    fn unchanged_column_rejects() {
        let filter = EventFilter::ColumnChanged(vec!["email".to_string()]);
        assert!(!filter.accepts(&stream_event(
            ChangeType::Update,
            &[("id", "1", "1"), ("email", "a", "a")]
        )));
    }

    #[test]
    fn absent_column_rejects() {
        let filter = EventFilter::ColumnChanged(vec!["phone".to_string()]);
        assert!(!filter.accepts(&stream_event(ChangeType::Update, &[("email", "a", "b")])));
    }

    #[test]
    fn non_update_events_bypass_column_filtering() {
        let filter = EventFilter::ColumnChanged(vec!["email".to_string()]);
        assert!(filter.accepts(&stream_event(ChangeType::Insert, &[("email", "", "a")])));
        assert!(filter.accepts(&stream_event(ChangeType::Delete, &[("email", "a", "")])));
    }
}
