use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PumpError;

/// The message-bus transport contract.
///
/// The engine declares every destination stream at pipeline registration and
/// publishes one JSON payload per mapped event. Publication is synchronous:
/// if the transport blocks, the reader blocks, which is what stops position
/// advancement until the bus drains.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Provision `stream` on the transport. Declaring an existing stream is
    /// a no-op.
    async fn declare_stream(&self, stream: &str) -> Result<(), PumpError>;

    async fn publish(&self, stream: &str, payload: serde_json::Value) -> Result<(), PumpError>;
}

/// Bus that logs instead of publishing. Used when no real transport is wired
/// in.
#[derive(Debug, Default)]
pub struct LogBus;

#[async_trait]
impl EventBus for LogBus {
    async fn declare_stream(&self, stream: &str) -> Result<(), PumpError> {
        debug!(stream, "declared stream");
        Ok(())
    }

    async fn publish(&self, stream: &str, payload: serde_json::Value) -> Result<(), PumpError> {
        info!(stream, %payload, "event published");
        Ok(())
    }
}
