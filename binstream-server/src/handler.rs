use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use binstream_replication::DataChangeEvent;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, trace};

use crate::bus::EventBus;
use crate::error::PumpError;
use crate::filter::EventFilter;
use crate::mapper::Mapper;

/// Opaque token identifying a registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// State shared by every handler invocation for one decoded event. Dropped
/// when the event is fully handled, so nothing leaks across events.
#[derive(Debug, Default)]
pub struct EventHandleContext {
    /// Streams already published to while handling the current event.
    pub stream_dispatched: HashSet<String>,
}

/// A recipient of decoded change events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        dce: &DataChangeEvent,
        ctx: &mut EventHandleContext,
    ) -> Result<(), PumpError>;
}

/// Dispatch table of registered handlers, keyed by [`HandlerId`].
///
/// Mutated only during pipeline add/remove, which the registry serializes
/// under its write lock; the reader takes cheap snapshots per event.
#[derive(Default)]
pub struct HandlerTable {
    entries: RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, handler));
        id
    }

    pub fn unregister(&self, id: HandlerId) {
        self.entries.write().retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// The registered handlers, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.entries
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

/// The handler registered for one pipeline: match, map, filter, publish.
pub struct PipelineHandler {
    schema_pattern: Regex,
    table_pattern: Regex,
    type_pattern: Option<Regex>,
    stream: String,
    filters: Vec<EventFilter>,
    mapper: Mapper,
    bus: Arc<dyn EventBus>,
}

impl PipelineHandler {
    pub fn new(
        schema_pattern: Regex,
        table_pattern: Regex,
        type_pattern: Option<Regex>,
        stream: String,
        filters: Vec<EventFilter>,
        mapper: Mapper,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        PipelineHandler {
            schema_pattern,
            table_pattern,
            type_pattern,
            stream,
            filters,
            mapper,
            bus,
        }
    }
}

#[async_trait]
impl EventHandler for PipelineHandler {
    async fn handle(
        &self,
        dce: &DataChangeEvent,
        ctx: &mut EventHandleContext,
    ) -> Result<(), PumpError> {
        if !self.schema_pattern.is_match(&dce.schema) {
            trace!(schema = %dce.schema, "schema pattern not matched, event ignored");
            return Ok(());
        }
        if !self.table_pattern.is_match(&dce.table) {
            trace!(table = %dce.table, "table pattern not matched, event ignored");
            return Ok(());
        }
        if let Some(type_pattern) = &self.type_pattern {
            if !type_pattern.is_match(dce.kind.as_str()) {
                trace!(kind = %dce.kind, "type pattern not matched, event ignored");
                return Ok(());
            }
        }

        // Pipelines sharing a stream with different filtering conditions
        // would publish duplicates; the first one to dispatch wins.
        if ctx.stream_dispatched.contains(&self.stream) {
            debug!(stream = %self.stream, "stream already dispatched for this event, skipped");
            return Ok(());
        }

        for event in self.mapper.map_event(dce) {
            if !self.filters.iter().any(|filter| filter.accepts(&event)) {
                continue;
            }

            ctx.stream_dispatched.insert(self.stream.clone());
            let payload = event.to_json()?;
            self.bus.publish(&self.stream, payload).await?;
            debug!(
                stream = %self.stream,
                schema = %dce.schema,
                table = %dce.table,
                kind = %dce.kind,
                "pipeline dispatched event"
            );
        }

        Ok(())
    }
}

/// Fallback handler installed when no pipeline is registered.
pub struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    async fn handle(
        &self,
        dce: &DataChangeEvent,
        _ctx: &mut EventHandleContext,
    ) -> Result<(), PumpError> {
        info!(
            schema = %dce.schema,
            table = %dce.table,
            kind = %dce.kind,
            records = dce.records.len(),
            "received event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use binstream_client::ChangeType;
    use binstream_replication::decoder::RowRecord;
    use binstream_replication::ColumnInfo;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn declare_stream(&self, _stream: &str) -> Result<(), PumpError> {
            Ok(())
        }

        async fn publish(&self, stream: &str, payload: serde_json::Value) -> Result<(), PumpError> {
            self.published.lock().push((stream.to_string(), payload));
            Ok(())
        }
    }

    fn handler(bus: Arc<RecordingBus>, filters: Vec<EventFilter>, stream: &str) -> PipelineHandler {
        PipelineHandler::new(
            Regex::new("^app$").unwrap(),
            Regex::new("^users$").unwrap(),
            Some(Regex::new("^(UPD)$").unwrap()),
            stream.to_string(),
            filters,
            Mapper::Stream,
            bus,
        )
    }

    fn update_event(records: Vec<RowRecord>) -> DataChangeEvent {
        DataChangeEvent {
            timestamp: 1700000000,
            schema: "app".to_string(),
            table: "users".to_string(),
            kind: ChangeType::Update,
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "int".to_string(),
                },
                ColumnInfo {
                    name: "email".to_string(),
                    data_type: "varchar".to_string(),
                },
            ],
            records,
        }
    }

    fn changed_row() -> RowRecord {
        RowRecord {
            before: vec![json!(1), json!("a")],
            after: vec![json!(1), json!("b")],
        }
    }

    #[tokio::test]
    async fn non_matching_schema_is_ignored() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(Arc::clone(&bus), vec![EventFilter::PassAll], "s.users");

        let mut event = update_event(vec![changed_row()]);
        event.schema = "other".to_string();

        let mut ctx = EventHandleContext::default();
        handler.handle(&event, &mut ctx).await.unwrap();
        assert_eq!(bus.published.lock().len(), 0);
    }

    #[tokio::test]
    async fn filter_miss_publishes_nothing() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(
            Arc::clone(&bus),
            vec![EventFilter::ColumnChanged(vec!["email".to_string()])],
            "s.users",
        );

        let event = update_event(vec![RowRecord {
            before: vec![json!(1), json!("a")],
            after: vec![json!(1), json!("a")],
        }]);

        let mut ctx = EventHandleContext::default();
        handler.handle(&event, &mut ctx).await.unwrap();
        assert_eq!(bus.published.lock().len(), 0);
        assert!(ctx.stream_dispatched.is_empty());
    }

    #[tokio::test]
    async fn multi_row_event_publishes_per_accepted_row() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(Arc::clone(&bus), vec![EventFilter::PassAll], "s.users");

        let event = update_event(vec![changed_row(), changed_row()]);
        let mut ctx = EventHandleContext::default();
        handler.handle(&event, &mut ctx).await.unwrap();
        assert_eq!(bus.published.lock().len(), 2);
    }

    #[tokio::test]
    async fn shared_stream_is_dispatched_once() {
        let bus = Arc::new(RecordingBus::default());
        let first = handler(Arc::clone(&bus), vec![EventFilter::PassAll], "s.users");
        let second = handler(
            Arc::clone(&bus),
            vec![EventFilter::ColumnChanged(vec!["email".to_string()])],
            "s.users",
        );

        let event = update_event(vec![changed_row()]);
        let mut ctx = EventHandleContext::default();
        first.handle(&event, &mut ctx).await.unwrap();
        second.handle(&event, &mut ctx).await.unwrap();
        assert_eq!(bus.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn context_does_not_leak_across_events() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(Arc::clone(&bus), vec![EventFilter::PassAll], "s.users");

        let event = update_event(vec![changed_row()]);
        let mut ctx = EventHandleContext::default();
        handler.handle(&event, &mut ctx).await.unwrap();

        let mut ctx = EventHandleContext::default();
        handler.handle(&event, &mut ctx).await.unwrap();
        assert_eq!(bus.published.lock().len(), 2);
    }

    #[test]
    fn handler_table_registration_round_trip() {
        let table = HandlerTable::default();
        assert!(table.is_empty());

        let id = table.register(Arc::new(LogHandler));
        let other = table.register(Arc::new(LogHandler));
        assert_eq!(table.len(), 2);
        assert_ne!(id, other);

        table.unregister(id);
        assert_eq!(table.len(), 1);
        table.unregister(id);
        assert_eq!(table.len(), 1);
    }
}
