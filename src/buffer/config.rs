use std::time::Duration;

/// Tunables for a `PageCache`. Process-wide constants (the CLOCK window in
/// particular) are deliberately made configurable here instead of baked in.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of resident pages.
    pub max_pages: usize,
    /// "lru" or "clock"; anything else falls back to "lru".
    pub eviction_policy: String,
    /// Number of dirty pages that triggers an eager writeback pass instead
    /// of waiting for the next timed wakeup.
    pub dirty_threshold: usize,
    /// How many pages ahead the readahead detector prefetches once it
    /// observes two sequential reads.
    pub readahead_window: u64,
    /// CLOCK's reference-bit approximation: a page counts as "referenced"
    /// if touched within this many ticks of now.
    pub clock_window_ticks: u64,
    /// How often the writeback engine wakes up even without a signal.
    pub writeback_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_pages: 65_536,
            eviction_policy: "lru".to_string(),
            dirty_threshold: 8192,
            readahead_window: 8,
            clock_window_ticks: 1000,
            writeback_interval: Duration::from_millis(100),
        }
    }
}
