use std::time::Duration;

/// Capacity and lifetime of cached video entries.
///
/// ```rust
/// # use muninn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(200)
///     .ttl(Duration::from_secs(30 * 60));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of video entries. Default: 500.
    pub max_entries: usize,
    /// Lifetime of an entry after its last access. Default: 1 hour.
    pub ttl: Duration,
    /// Events buffered per artifact for slow subscribers. Default: 64.
    pub event_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: Duration::from_secs(3600),
            event_buffer: 64,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }

    /// Set the time-to-live measured from last access.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = n.max(1);
        self
    }
}
