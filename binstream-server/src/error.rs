use binstream_replication::ReplicationError;
use thiserror::Error;

/// Errors surfaced by the engine, registry and admin surface.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("pipeline.stream is empty")]
    EmptyStream,

    #[error("invalid pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Not supported for HA mode")]
    HaMode,

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("event bus failure: {0}")]
    Bus(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine is not in a startable state: {0}")]
    Lifecycle(String),
}
