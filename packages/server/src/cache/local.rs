use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheBackend;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache backend. Entries expire lazily on read, with a sweep
/// on insert once the map grows.
pub struct LocalCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

const SWEEP_THRESHOLD: usize = 4096;

impl LocalCacheBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for LocalCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for LocalCacheBackend {
    async fn get(&self, key: &str, ttl: Duration, idle: bool) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    if !idle {
                        return Some(entry.value.clone());
                    }
                }
                _ => return None,
            }
        }
        // Idle entries get their deadline pushed out on every read.
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        if entry.expires_at <= Instant::now() {
            entries.remove(key);
            return None;
        }
        entry.expires_at = Instant::now() + ttl;
        Some(entry.value.clone())
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.write().await;
        if entries.len() >= SWEEP_THRESHOLD {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let backend = LocalCacheBackend::new();
        backend
            .put("k", "v".into(), Duration::from_millis(10))
            .await;
        assert_eq!(
            backend.get("k", Duration::from_millis(10), false).await,
            Some("v".into())
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("k", Duration::from_millis(10), false).await, None);
    }

    #[tokio::test]
    async fn idle_reads_extend_lifetime() {
        let backend = LocalCacheBackend::new();
        let ttl = Duration::from_millis(40);
        backend.put("k", "v".into(), ttl).await;
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            assert!(backend.get("k", ttl, true).await.is_some(), "entry went cold");
        }
    }
}
