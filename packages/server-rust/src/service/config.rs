use crate::network::NetworkConfig;

/// Bucket store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of monthly buckets held in memory.
    pub max_items: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_items: 100 }
    }
}

/// Server-level configuration assembled from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub store: StoreConfig,
    /// Interval between periodic flushes of dirty buckets in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            store: StoreConfig::default(),
            flush_interval_ms: 60_000,
        }
    }
}
