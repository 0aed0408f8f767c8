use std::collections::HashMap;
use std::sync::Arc;

use binstream_client::{event_type_regex, parse_event_type_regex, ApiPipeline, Condition};
use itertools::Itertools;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::error::PumpError;
use crate::filter::EventFilter;
use crate::handler::{HandlerId, HandlerTable, PipelineHandler};
use crate::mapper::Mapper;

/// A routing rule from a `(schema, table, type, columns-changed)` pattern to
/// a destination stream.
///
/// The serialized form is what the local pipelines file holds: the handler
/// id, the expanded type list and the enabled flag never leave the process
/// (loaders force `enabled = true`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(skip)]
    pub handler_id: Option<HandlerId>,

    /// Schema name pattern.
    pub schema: String,

    /// Table name pattern.
    pub table: String,

    /// Destination stream name.
    pub stream: String,

    /// Event type pattern in the canonical `^(T1|T2)$` form; empty matches
    /// every type.
    #[serde(rename = "type", default)]
    pub type_pattern: String,

    /// Event types: INS, UPD, DEL.
    #[serde(skip)]
    pub types: Vec<String>,

    #[serde(skip)]
    pub enabled: bool,

    /// Extra filtering conditions.
    #[serde(default)]
    pub condition: Condition,
}

impl Pipeline {
    pub fn from_api(api: ApiPipeline) -> Pipeline {
        Pipeline {
            handler_id: None,
            schema: api.schema,
            table: api.table,
            stream: api.stream,
            type_pattern: event_type_regex(&api.event_types),
            types: api.event_types,
            enabled: true,
            condition: api.condition,
        }
    }

    pub fn to_api(&self) -> ApiPipeline {
        ApiPipeline {
            schema: self.schema.clone(),
            table: self.table.clone(),
            event_types: self.event_types(),
            stream: self.stream.clone(),
            condition: self.condition.clone(),
        }
    }

    /// The type set, expanded back from the canonical pattern when the
    /// explicit list is absent (e.g. after loading the persisted form).
    pub fn event_types(&self) -> Vec<String> {
        if !self.types.is_empty() {
            return self.types.clone();
        }
        parse_event_type_regex(&self.type_pattern).unwrap_or_default()
    }

    /// Registry key: pipelines are grouped by their raw schema/table
    /// patterns.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Trim user-supplied fields and bring the type list and type pattern in
    /// sync, whichever of the two was provided.
    pub fn canonicalize(&mut self) {
        self.schema = self.schema.trim().to_string();
        self.table = self.table.trim().to_string();
        self.stream = self.stream.trim().to_string();
        self.type_pattern = self.type_pattern.trim().to_string();
        for column in &mut self.condition.column_changed {
            *column = column.trim().to_string();
        }

        if !self.types.is_empty() {
            for t in &mut self.types {
                *t = t.trim().to_string();
            }
            self.type_pattern = event_type_regex(&self.types);
        } else if let Some(types) = parse_event_type_regex(&self.type_pattern) {
            self.type_pattern = event_type_regex(&types);
            self.types = types;
        }
    }

    /// Structural equality: two pipelines are the same route when their
    /// patterns, stream and normalized column set coincide.
    pub fn same_as(&self, other: &Pipeline) -> bool {
        self.schema == other.schema
            && self.table == other.table
            && self.type_pattern == other.type_pattern
            && self.stream == other.stream
            && same_condition(&self.condition, &other.condition)
    }
}

fn same_condition(a: &Condition, b: &Condition) -> bool {
    if a.column_changed.len() != b.column_changed.len() {
        return false;
    }
    let mut a = a.column_changed.clone();
    let mut b = b.column_changed.clone();
    a.sort();
    b.sort();
    a == b
}

/// The set of active pipelines and their registered handlers.
///
/// Mutations hold the write lock for their whole span, so handler
/// registration and map insertion are atomic with respect to concurrent
/// add/remove calls; snapshots hold the read lock.
pub struct Registry {
    bus: Arc<dyn EventBus>,
    handlers: Arc<HandlerTable>,
    pipelines: RwLock<HashMap<String, Vec<Pipeline>>>,
}

impl Registry {
    pub fn new(bus: Arc<dyn EventBus>) -> Registry {
        Registry {
            bus,
            handlers: Arc::new(HandlerTable::default()),
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    pub fn handlers(&self) -> Arc<HandlerTable> {
        Arc::clone(&self.handlers)
    }

    /// Register a pipeline: validate, compile, declare its stream, install
    /// its handler. A structurally equal pipeline already present makes this
    /// a successful no-op; a disabled pipeline is skipped outright.
    pub async fn add(&self, pipeline: Pipeline) -> Result<(), PumpError> {
        if !pipeline.enabled {
            return Ok(());
        }

        let mut pipeline = pipeline;
        pipeline.canonicalize();

        if pipeline.stream.is_empty() {
            return Err(PumpError::EmptyStream);
        }

        let schema_pattern = compile(&pipeline.schema)?;
        let table_pattern = compile(&pipeline.table)?;
        let type_pattern = if pipeline.type_pattern.is_empty() {
            None
        } else {
            Some(compile(&pipeline.type_pattern)?)
        };

        let filters = EventFilter::for_condition(&pipeline.condition);
        let mapper = Mapper::default();

        // Declaring an existing stream is a no-op on the transport, so this
        // can happen ahead of the duplicate check, outside the lock.
        self.bus.declare_stream(&pipeline.stream).await?;

        let handler = Arc::new(PipelineHandler::new(
            schema_pattern,
            table_pattern,
            type_pattern,
            pipeline.stream.clone(),
            filters,
            mapper,
            Arc::clone(&self.bus),
        ));

        let mut pipelines = self.pipelines.write();
        let entry = pipelines.entry(pipeline.key()).or_default();
        if entry.iter().any(|existing| existing.same_as(&pipeline)) {
            debug!(key = %pipeline.key(), "duplicate pipeline, skipped");
            return Ok(());
        }

        pipeline.handler_id = Some(self.handlers.register(handler));
        info!(
            schema = %pipeline.schema,
            table = %pipeline.table,
            types = %pipeline.type_pattern,
            stream = %pipeline.stream,
            columns = ?pipeline.condition.column_changed,
            "subscribed binlog events"
        );
        entry.push(pipeline);
        Ok(())
    }

    /// Drop the structurally matching pipeline and unregister its handler.
    /// Unknown pipelines are a no-op.
    pub fn remove(&self, pipeline: &Pipeline) {
        let mut target = pipeline.clone();
        target.canonicalize();

        let mut pipelines = self.pipelines.write();
        if let Some(entry) = pipelines.get_mut(&target.key()) {
            if let Some(idx) = entry.iter().position(|p| p.same_as(&target)) {
                let removed = entry.remove(idx);
                if let Some(handler_id) = removed.handler_id {
                    self.handlers.unregister(handler_id);
                }
                info!(
                    schema = %removed.schema,
                    table = %removed.table,
                    stream = %removed.stream,
                    "removed pipeline"
                );
                return;
            }
        }
        info!(key = %target.key(), "pipeline not found, nothing to remove");
    }

    /// Admin-facing snapshot, stable-sorted by (schema, table).
    pub fn list(&self) -> Vec<ApiPipeline> {
        self.pipelines
            .read()
            .values()
            .flatten()
            .map(Pipeline::to_api)
            .sorted_by(|a, b| {
                a.schema
                    .cmp(&b.schema)
                    .then_with(|| a.table.cmp(&b.table))
            })
            .collect()
    }

    /// Snapshot in the persisted shape, sorted for deterministic output.
    pub fn snapshot(&self) -> Vec<Pipeline> {
        self.pipelines
            .read()
            .values()
            .flatten()
            .cloned()
            .sorted_by(|a, b| {
                a.schema
                    .cmp(&b.schema)
                    .then_with(|| a.table.cmp(&b.table))
                    .then_with(|| a.stream.cmp(&b.stream))
            })
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, PumpError> {
    Regex::new(pattern).map_err(|source| PumpError::BadPattern {
        pattern: pattern.to_string(),
        source,
    })
}
