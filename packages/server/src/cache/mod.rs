//! Named, TTL-bounded caches with tenant-prefixed keys.
//!
//! Coherence is write-behind-invalidate: writers (ingest consumer,
//! lifecycle workers, correction job, admin handlers) evict explicitly
//! after committing; readers batch-load on miss. There is no
//! write-through, so staleness of non-invalidated entries is bounded by
//! the per-cache TTL.

mod local;
mod shared;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::entity::types::VolumeKind;
use crate::error::AppError;

pub use local::LocalCacheBackend;
pub use shared::SharedCacheBackend;

#[derive(Debug, Clone, Copy)]
pub struct CacheSpec {
    pub name: &'static str,
    pub ttl: Duration,
    /// Idle expiry: reads push the deadline out again.
    pub idle: bool,
}

pub const INSTANCE_LOCATIONS: CacheSpec = CacheSpec {
    name: "instance-locations",
    ttl: Duration::from_secs(30 * 60),
    idle: true,
};

pub const SERIES_METADATA_LOOKUP: CacheSpec = CacheSpec {
    name: "series-metadata-lookup",
    ttl: Duration::from_secs(60 * 60),
    idle: false,
};

pub const SERIES_BY_STUDY: CacheSpec = CacheSpec {
    name: "series-by-study",
    ttl: Duration::from_secs(60 * 60),
    idle: false,
};

pub const ACTIVE_TENANTS: CacheSpec = CacheSpec {
    name: "active-tenants",
    ttl: Duration::from_secs(60),
    idle: false,
};

pub const LIFECYCLE_RULES: CacheSpec = CacheSpec {
    name: "lifecycle-rules",
    ttl: Duration::from_secs(6 * 60 * 60),
    idle: false,
};

/// Where one instance's bytes live, plus what the frame service needs to
/// validate a request without re-reading the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLocation {
    pub volume_id: i32,
    pub path: String,
    pub transfer_syntax_uid: String,
    pub num_frames: i32,
    pub file_size: i64,
}

/// Whole-series location map, sop UID to location. Batch-loaded so N
/// frame requests against one series cost one query.
pub type SeriesLocations = HashMap<String, InstanceLocation>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadataLookup {
    pub series_id: i64,
    pub created_date: NaiveDate,
    pub metadata_volume_id: Option<i32>,
    pub metadata_path: Option<String>,
    pub provider_kind: Option<VolumeKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub series_id: i64,
    pub series_uid: String,
    pub modality: String,
    pub series_number: Option<i32>,
    pub description: Option<String>,
    pub num_instances: i32,
    pub created_date: NaiveDate,
}

/// Storage behind the named caches. Values are JSON strings; backends are
/// free to treat them opaquely.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str, ttl: Duration, idle: bool) -> Option<String>;
    async fn put(&self, key: &str, value: String, ttl: Duration);
    async fn remove(&self, key: &str);
}

pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
}

impl CacheLayer {
    pub async fn from_config(config: &CacheConfig) -> anyhow::Result<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Local => Arc::new(LocalCacheBackend::new()),
            CacheBackendKind::Shared => Arc::new(SharedCacheBackend::connect(&config.url).await?),
        };
        Ok(Self { backend })
    }

    pub fn local() -> Self {
        Self {
            backend: Arc::new(LocalCacheBackend::new()),
        }
    }

    fn full_key(spec: &CacheSpec, key: &str) -> String {
        format!("{}:{}", spec.name, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, spec: &CacheSpec, key: &str) -> Option<T> {
        let raw = self
            .backend
            .get(&Self::full_key(spec, key), spec.ttl, spec.idle)
            .await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = spec.name, key, error = %e, "Dropping undecodable cache entry");
                self.backend.remove(&Self::full_key(spec, key)).await;
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, spec: &CacheSpec, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                self.backend
                    .put(&Self::full_key(spec, key), raw, spec.ttl)
                    .await;
            }
            Err(e) => warn!(cache = spec.name, key, error = %e, "Failed to encode cache entry"),
        }
    }

    pub async fn evict(&self, spec: &CacheSpec, key: &str) {
        self.backend.remove(&Self::full_key(spec, key)).await;
    }

    /// Read-through load: on miss, run the loader and cache its result.
    pub async fn get_with<T, F, Fut>(
        &self,
        spec: &CacheSpec,
        key: &str,
        loader: F,
    ) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(hit) = self.get(spec, key).await {
            return Ok(hit);
        }
        let value = loader().await?;
        self.put(spec, key, &value).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_with_loads_once_then_hits() {
        let layer = CacheLayer::local();
        let loaded: u32 = layer
            .get_with(&SERIES_BY_STUDY, "h1:1.2.1", || async { Ok(41u32) })
            .await
            .unwrap();
        assert_eq!(loaded, 41);

        // Loader is not consulted on a hit.
        let hit: u32 = layer
            .get_with(&SERIES_BY_STUDY, "h1:1.2.1", || async {
                Err(AppError::Internal("loader must not run".into()))
            })
            .await
            .unwrap();
        assert_eq!(hit, 41);
    }

    #[tokio::test]
    async fn eviction_forces_reload() {
        let layer = CacheLayer::local();
        layer.put(&ACTIVE_TENANTS, "all", &vec!["h1".to_string()]).await;
        assert!(layer.get::<Vec<String>>(&ACTIVE_TENANTS, "all").await.is_some());

        layer.evict(&ACTIVE_TENANTS, "all").await;
        assert!(layer.get::<Vec<String>>(&ACTIVE_TENANTS, "all").await.is_none());
    }

    #[tokio::test]
    async fn caches_are_namespaced() {
        let layer = CacheLayer::local();
        layer.put(&SERIES_BY_STUDY, "k", &1u8).await;
        assert!(layer.get::<u8>(&SERIES_METADATA_LOOKUP, "k").await.is_none());
    }
}
