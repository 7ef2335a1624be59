//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for synchronization passes and lazy loads.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound for a single remote request. Expired requests are
    /// reported as per-record timeouts.
    pub request_timeout: Duration,
    /// Maximum number of remote requests in flight within one phase.
    pub max_in_flight: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_in_flight: 8,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the concurrency limit. Values below one are raised to one.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
