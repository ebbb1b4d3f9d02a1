/// Broker connection settings for the ingest queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection URL.
    pub url: String,
    /// Connection pool size.
    pub pool_size: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".into(),
            pool_size: 5,
        }
    }
}
