//! Runtime tunables for the sync core.

use std::time::Duration;

/// Sync core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-connection outbound queue capacity
    pub outbound_queue_capacity: usize,
    /// Hub event queue capacity
    pub event_queue_capacity: usize,
    /// A connection with no inbound traffic for this long is closed
    pub liveness_timeout_secs: u64,
    /// Ping interval; must be shorter than the liveness timeout
    pub keepalive_interval_secs: u64,
    /// Deadline for a single outbound write
    pub write_timeout_secs: u64,
    /// Autosave tick period
    pub autosave_interval_secs: u64,
    /// History records kept per tab after pruning
    pub history_retention: usize,
    /// Default `limit` for history queries
    pub history_default_limit: usize,
    /// Snapshots returned by the listing endpoint
    pub snapshot_list_limit: usize,
    /// Largest accepted image upload in bytes
    pub max_image_bytes: u64,
    /// Session token lifetime
    pub token_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            event_queue_capacity: 256,
            liveness_timeout_secs: 60,
            keepalive_interval_secs: 54,
            write_timeout_secs: 10,
            autosave_interval_secs: 300,
            history_retention: 50,
            history_default_limit: 20,
            snapshot_list_limit: 50,
            max_image_bytes: 10 * 1024 * 1024,
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl SyncConfig {
    /// Small queues and short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            outbound_queue_capacity: 16,
            event_queue_capacity: 64,
            liveness_timeout_secs: 6,
            keepalive_interval_secs: 5,
            write_timeout_secs: 2,
            autosave_interval_secs: 1,
            ..Self::default()
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.history_retention, 50);
        assert_eq!(config.autosave_interval(), Duration::from_secs(300));
        assert!(config.keepalive_interval() < config.liveness_timeout());
    }

    #[test]
    fn test_testing_profile_keeps_keepalive_below_liveness() {
        let config = SyncConfig::for_testing();
        assert!(config.keepalive_interval() < config.liveness_timeout());
        assert_eq!(config.history_retention, 50);
    }
}
