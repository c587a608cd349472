//! Bridge-side tuning constants. All range-clamped env lookups for the
//! bridge happen here, in one place.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pause before closing the shutdown channel so final response frames
    /// flush.
    pub shutdown_flush_pause: Duration,
    /// Cap on waiting for in-flight stream tasks to drain on shutdown.
    pub stream_drain_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shutdown_flush_pause: Duration::from_millis(50),
            stream_drain_timeout: Duration::from_secs(5),
        }
    }
}
