use async_trait::async_trait;

use crate::error::PumpError;

/// Callback invoked when leadership is acquired.
pub type LeaderCallback = Box<dyn FnOnce() + Send>;

/// The distributed-election contract for HA mode.
///
/// The engine only needs `on_acquired` to run when this process becomes the
/// leader; the supervisor guards it with a one-shot gate, so implementations
/// that re-acquire leadership may call it again safely. Leadership loss is
/// signalled by cancelling the engine, which stops the reader.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    async fn elect(&self, on_acquired: LeaderCallback) -> Result<(), PumpError>;
}

/// Elector used outside HA mode and in tests: the caller is always the
/// leader.
#[derive(Debug, Default)]
pub struct StandaloneElector;

#[async_trait]
impl LeaderElector for StandaloneElector {
    async fn elect(&self, on_acquired: LeaderCallback) -> Result<(), PumpError> {
        on_acquired();
        Ok(())
    }
}
