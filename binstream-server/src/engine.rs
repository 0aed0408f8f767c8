use std::sync::{Arc, Once};
use std::time::Duration;

use binstream_client::ApiPipeline;
use binstream_replication::{
    BinlogSource, EventDecoder, PositionStore, ReplicationError, SchemaFilter, SchemaProvider,
    SourceFactory, TableCatalog,
};
use metrics::counter;
use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::config::{Options, PumpConfig};
use crate::error::PumpError;
use crate::handler::{EventHandleContext, HandlerTable, LogHandler};
use crate::health::BinlogHealth;
use crate::leader::LeaderElector;
use crate::persistence;
use crate::registry::{Pipeline, Registry};

/// How often the non-HA server flushes admin-created pipelines to disk.
const LOCAL_CONFIG_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// The supervisor tying the engine together: bootstraps the registry from
/// configuration, runs the single reader task behind the leader gate, flushes
/// local configs, and owns shutdown.
///
/// One `Engine` is one process-wide instance with an explicit lifecycle
/// (`new`, `start`, `shutdown`); tests build fresh engines with stub
/// collaborators.
pub struct Engine {
    options: Options,
    registry: Registry,
    handlers: Arc<HandlerTable>,
    schema_filter: Arc<SchemaFilter>,
    position_store: Arc<dyn PositionStore>,
    source_factory: Arc<dyn SourceFactory>,
    /// Taken by the reader when it starts; the catalog is owned by that one
    /// task.
    schema_provider: Mutex<Option<Box<dyn SchemaProvider>>>,
    elector: Arc<dyn LeaderElector>,
    health: BinlogHealth,
    shutdown: CancellationToken,
    /// In HA mode the election callback may fire more than once over the
    /// process lifetime; the reader must not.
    reader_gate: Once,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Build an engine: compile the global filter, register the boot-time
    /// pipelines from `config`, then merge the ones persisted to the local
    /// pipelines file (each forced enabled).
    pub async fn new(
        options: Options,
        config: PumpConfig,
        bus: Arc<dyn EventBus>,
        elector: Arc<dyn LeaderElector>,
        position_store: Arc<dyn PositionStore>,
        source_factory: Arc<dyn SourceFactory>,
        schema_provider: Box<dyn SchemaProvider>,
    ) -> Result<Arc<Engine>, PumpError> {
        let include = compile_filter(&config.filter.include)?;
        let exclude = compile_filter(&config.filter.exclude)?;
        let schema_filter = Arc::new(SchemaFilter::new(include, exclude));

        let registry = Registry::new(bus);
        let handlers = registry.handlers();

        let mut pipelines: Vec<Pipeline> = config
            .pipelines
            .into_iter()
            .map(|p| p.into_pipeline())
            .collect();
        pipelines.extend(persistence::load_pipelines(&options.pipelines_file));

        for pipeline in pipelines {
            registry.add(pipeline).await?;
        }

        Ok(Arc::new(Engine {
            options,
            registry,
            handlers,
            schema_filter,
            position_store,
            source_factory,
            schema_provider: Mutex::new(Some(schema_provider)),
            elector,
            health: BinlogHealth::default(),
            shutdown: CancellationToken::new(),
            reader_gate: Once::new(),
            reader_handle: Mutex::new(None),
            save_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// Start the engine: the local-config flush tick (non-HA) and the reader,
    /// either immediately or once leadership is acquired.
    pub async fn start(self: &Arc<Self>) -> Result<(), PumpError> {
        if self.options.ha {
            let engine = Arc::clone(self);
            self.elector
                .elect(Box::new(move || engine.start_reader()))
                .await
        } else {
            self.spawn_config_flush();
            self.start_reader();
            Ok(())
        }
    }

    /// Cancelled when the engine is coming down, either via
    /// [`shutdown`](Engine::shutdown) or because the reader hit a fatal
    /// error.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }

    /// Whether the binlog stream has produced a frame recently.
    pub fn binlog_healthy(&self) -> bool {
        self.health.healthy()
    }

    /// Stop the reader and flush local configs one last time (non-HA).
    pub async fn shutdown(&self) {
        if !self.options.ha {
            self.flush_local_configs().await;
        }
        self.shutdown.cancel();

        let handle = self.reader_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                error!(%error, "reader task did not stop cleanly");
            }
        }
    }

    fn start_reader(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        self.reader_gate.call_once(move || {
            let handle = tokio::spawn(async move { engine.run_reader().await });
            *self.reader_handle.lock() = Some(handle);
        });
    }

    async fn run_reader(self: &Arc<Self>) {
        info!("starting event pump");
        match self.read_loop().await {
            Ok(()) => info!("event pump stopped"),
            Err(error) => error!(%error, "event pump failed"),
        }
        self.position_store.detach().await;
        // Reader exit, clean or not, brings the process down.
        self.shutdown.cancel();
    }

    async fn read_loop(&self) -> Result<(), PumpError> {
        self.position_store.attach().await?;
        let position = self.position_store.load().await?;
        info!(%position, "resuming replication");

        let mut source: Box<dyn BinlogSource> = self.source_factory.connect(&position).await?;

        if self.handlers.is_empty() {
            info!("no pipeline registered, installing the default logging handler");
            self.handlers.register(Arc::new(LogHandler));
        }

        let provider = self
            .schema_provider
            .lock()
            .take()
            .ok_or_else(|| PumpError::Lifecycle("reader already consumed its catalog".to_string()))?;
        let mut decoder = EventDecoder::new(
            TableCatalog::new(provider),
            Arc::clone(&self.schema_filter),
            &position,
        );

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = source.next_frame() => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(error @ ReplicationError::Decode(_)) => {
                    warn!(%error, "skipping undecodable frame");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            self.health.record_frame();
            counter!("binstream_frames_total").increment(1);

            let outcome = decoder.decode(frame).await?;

            if let Some(event) = outcome.event {
                let mut ctx = EventHandleContext::default();
                for handler in self.handlers.snapshot() {
                    handler.handle(&event, &mut ctx).await?;
                }
                counter!("binstream_events_total").increment(1);
            }

            // Persisted only once every handler returned success; a crash
            // before this point replays rather than loses events.
            if let Some(checkpoint) = outcome.checkpoint {
                self.position_store.save(&checkpoint).await?;
            }
        }
    }

    fn spawn_config_flush(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LOCAL_CONFIG_FLUSH_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick completes immediately.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => return,
                    _ = tick.tick() => engine.flush_local_configs().await,
                }
            }
        });
    }

    async fn flush_local_configs(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.registry.snapshot();
        if let Err(error) = persistence::save_pipelines(&self.options.pipelines_file, &snapshot) {
            error!(
                %error,
                path = %self.options.pipelines_file.display(),
                "failed to save local pipeline configs"
            );
        }
    }

    fn reject_in_ha(&self) -> Result<(), PumpError> {
        if self.options.ha {
            Err(PumpError::HaMode)
        } else {
            Ok(())
        }
    }

    // Admin surface. The HTTP adapter forwards here; everything is rejected
    // in HA mode.

    /// Create a pipeline. Duplicates are accepted silently.
    pub async fn create_pipeline(&self, pipeline: ApiPipeline) -> Result<(), PumpError> {
        self.reject_in_ha()?;
        self.registry.add(Pipeline::from_api(pipeline)).await
    }

    /// Remove a pipeline. Unknown pipelines are a no-op, so removal is
    /// idempotent.
    pub async fn remove_pipeline(&self, pipeline: ApiPipeline) -> Result<(), PumpError> {
        self.reject_in_ha()?;
        self.registry.remove(&Pipeline::from_api(pipeline));
        Ok(())
    }

    /// The registered pipelines, sorted by (schema, table).
    pub fn list_pipelines(&self) -> Result<Vec<ApiPipeline>, PumpError> {
        self.reject_in_ha()?;
        Ok(self.registry.list())
    }
}

fn compile_filter(pattern: &str) -> Result<Option<Regex>, PumpError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| PumpError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })
}
