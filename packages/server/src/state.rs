use std::sync::Arc;

use sea_orm::DatabaseConnection;

use mq::IngestQueue;

use crate::cache::CacheLayer;
use crate::config::AppConfig;
use crate::diskmon::DiskMonitor;
use crate::volumes::VolumeManager;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub queue: Arc<IngestQueue>,
    pub volumes: Arc<VolumeManager>,
    pub caches: Arc<CacheLayer>,
    pub disk: Arc<DiskMonitor>,
}
