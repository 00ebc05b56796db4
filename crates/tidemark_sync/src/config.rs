//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of records per fetched page.
    pub page_size: u32,
    /// Pause inserted between page requests when more than one page is
    /// expected, to respect backend rate limits.
    pub page_delay: Duration,
    /// Interval between scheduled background cycles.
    pub sync_interval: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default pacing.
    pub fn new() -> Self {
        Self {
            page_size: 50,
            page_delay: Duration::from_millis(300),
            sync_interval: Duration::from_secs(60),
            event_capacity: 64,
        }
    }

    /// Sets the fetch page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the inter-page delay.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the lifecycle event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
