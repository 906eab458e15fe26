//! Engine tunables.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one [`crate::engine::CollabEngine`].
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Upper bound of the random delay injected before each delivery
    pub max_jitter: Duration,
    /// Idle delay after the last edit before `typing` reverts to `idle`
    pub typing_revert_delay: Duration,
    /// How long an execution lock stays held after the run completes
    pub execution_cooldown: Duration,
    /// Simulated round-trip before a runner is invoked
    pub execution_latency: Duration,
    /// Simulated round-trip of a save
    pub save_latency: Duration,
    /// Snapshot storage path (None = process-local, in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Empty rooms idle for longer than this are evicted by the reaper
    pub room_idle_ttl: Duration,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_millis(100),
            typing_revert_delay: Duration::from_millis(1500),
            execution_cooldown: Duration::from_millis(500),
            execution_latency: Duration::from_millis(800),
            save_latency: Duration::from_millis(500),
            storage_path: None,
            room_idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl CollabConfig {
    /// Create config for testing (millisecond delays, no simulated latency).
    pub fn for_testing() -> Self {
        Self {
            max_jitter: Duration::from_millis(5),
            typing_revert_delay: Duration::from_millis(60),
            execution_cooldown: Duration::from_millis(80),
            execution_latency: Duration::ZERO,
            save_latency: Duration::ZERO,
            storage_path: None,
            room_idle_ttl: Duration::from_millis(50),
        }
    }

    /// Same config with persistence enabled at the given path.
    pub fn with_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}
