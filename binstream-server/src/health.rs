use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Liveness signal of the binlog stream: healthy while frames keep arriving.
///
/// The reader stamps every frame it pulls; probes ask whether the last frame
/// is within the staleness window. Construction counts as the first stamp so
/// a freshly started server is healthy before its first frame.
#[derive(Debug)]
pub struct BinlogHealth {
    last_frame_epoch: AtomicI64,
    window: Duration,
}

impl BinlogHealth {
    pub fn new(window: Duration) -> Self {
        BinlogHealth {
            last_frame_epoch: AtomicI64::new(now_epoch()),
            window,
        }
    }

    pub fn record_frame(&self) {
        self.last_frame_epoch.store(now_epoch(), Ordering::Relaxed);
    }

    pub fn healthy(&self) -> bool {
        let last = self.last_frame_epoch.load(Ordering::Relaxed);
        let age = now_epoch().saturating_sub(last);
        age >= 0 && (age as u64) <= self.window.as_secs()
    }
}

impl Default for BinlogHealth {
    fn default() -> Self {
        // The primary emits heartbeats well within this window on an idle
        // stream.
        BinlogHealth::new(Duration::from_secs(60))
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_health_is_healthy() {
        assert!(BinlogHealth::default().healthy());
    }

    #[test]
    fn stale_health_is_unhealthy() {
        let health = BinlogHealth::new(Duration::from_secs(60));
        health
            .last_frame_epoch
            .store(now_epoch() - 120, Ordering::Relaxed);
        assert!(!health.healthy());

        health.record_frame();
        assert!(health.healthy());
    }
}
