//! In-memory registry of storage volumes.
//!
//! The registry is loaded at startup and on explicit reload. Providers are
//! constructed once per volume (object-store clients own connection pools)
//! and the whole snapshot is swapped atomically, so readers see the old or
//! the new index but never a torn view.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tokio::sync::RwLock;
use tracing::{info, warn};

use common::storage::{
    LocalProvider, ObjectStoreConfig, ObjectStoreProvider, StorageError, StorageProvider,
};
use common::template;

use crate::entity::shared::storage_volume::{self, Model as VolumeModel};
use crate::entity::types::{StorageTier, VolumeKind, VolumeStatus};

/// Free-space floor for accepting writes on a local volume.
const MIN_FREE_BYTES: u64 = 1 << 30;

#[derive(Debug)]
pub enum VolumeError {
    NoWriteVolume(StorageTier),
    UnknownVolume(i32),
    Db(String),
    Provider(StorageError),
    Template(template::TemplateError),
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWriteVolume(tier) => {
                write!(f, "no ACTIVE volume with free space in tier {tier}")
            }
            Self::UnknownVolume(id) => write!(f, "unknown volume {id}"),
            Self::Db(e) => write!(f, "volume registry query failed: {e}"),
            Self::Provider(e) => write!(f, "provider construction failed: {e}"),
            Self::Template(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for VolumeError {}

impl From<sea_orm::DbErr> for VolumeError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Db(e.to_string())
    }
}

struct Snapshot {
    volumes: HashMap<i32, VolumeModel>,
    /// Volume ids per tier, priority descending.
    by_tier: HashMap<StorageTier, Vec<i32>>,
    providers: HashMap<i32, Arc<dyn StorageProvider>>,
    locals: HashMap<i32, Arc<LocalProvider>>,
}

pub struct VolumeManager {
    db: DatabaseConnection,
    default_template: String,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl VolumeManager {
    pub async fn load(
        db: DatabaseConnection,
        default_template: String,
    ) -> Result<Self, VolumeError> {
        let snapshot = build_snapshot(&db, None).await?;
        Ok(Self {
            db,
            default_template,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Re-read the registry and atomically replace the tier index.
    /// Cached providers survive unless their connection config changed.
    /// Compiled path templates are invalidated because volume overrides
    /// may have moved.
    pub async fn reload(&self) -> Result<(), VolumeError> {
        let previous = self.snapshot.read().await.clone();
        let next = build_snapshot(&self.db, Some(&previous)).await?;
        *self.snapshot.write().await = Arc::new(next);
        template::clear_cache();
        info!("Volume registry reloaded");
        Ok(())
    }

    /// Highest-priority ACTIVE volume in the tier with enough free space.
    pub async fn active_write_volume(
        &self,
        tier: StorageTier,
    ) -> Result<(VolumeModel, Arc<dyn StorageProvider>), VolumeError> {
        let snapshot = self.snapshot.read().await.clone();
        let Some(candidates) = snapshot.by_tier.get(&tier) else {
            return Err(VolumeError::NoWriteVolume(tier));
        };
        for id in candidates {
            let volume = &snapshot.volumes[id];
            if volume.status != VolumeStatus::Active {
                continue;
            }
            if let Some(local) = snapshot.locals.get(id) {
                match local.available_bytes().await {
                    Ok(free) if free < MIN_FREE_BYTES => {
                        warn!(volume = %volume.code, free, "Skipping volume below write floor");
                        continue;
                    }
                    Err(e) => {
                        warn!(volume = %volume.code, error = %e, "Capacity probe failed, skipping");
                        continue;
                    }
                    Ok(_) => {}
                }
            }
            let provider = snapshot.providers[id].clone();
            return Ok((volume.clone(), provider));
        }
        Err(VolumeError::NoWriteVolume(tier))
    }

    pub async fn provider(&self, volume_id: i32) -> Result<Arc<dyn StorageProvider>, VolumeError> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .providers
            .get(&volume_id)
            .cloned()
            .ok_or(VolumeError::UnknownVolume(volume_id))
    }

    pub async fn volume(&self, volume_id: i32) -> Option<VolumeModel> {
        self.snapshot.read().await.volumes.get(&volume_id).cloned()
    }

    pub async fn volumes_in_tier(&self, tier: StorageTier) -> Vec<VolumeModel> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .by_tier
            .get(&tier)
            .map(|ids| ids.iter().map(|id| snapshot.volumes[id].clone()).collect())
            .unwrap_or_default()
    }

    /// Local providers of ACTIVE volumes, for the disk monitor.
    pub async fn active_local_volumes(&self) -> Vec<(VolumeModel, Arc<LocalProvider>)> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .locals
            .iter()
            .filter_map(|(id, local)| {
                let volume = snapshot.volumes.get(id)?;
                (volume.status == VolumeStatus::Active)
                    .then(|| (volume.clone(), local.clone()))
            })
            .collect()
    }

    /// Compiled path template for a volume, falling back to the
    /// deployment default.
    pub fn template_for(
        &self,
        volume: &VolumeModel,
    ) -> Result<Arc<template::PathTemplate>, VolumeError> {
        let source = volume
            .path_template
            .as_deref()
            .unwrap_or(&self.default_template);
        template::PathTemplate::compiled(source).map_err(VolumeError::Template)
    }
}

async fn build_snapshot(
    db: &DatabaseConnection,
    previous: Option<&Snapshot>,
) -> Result<Snapshot, VolumeError> {
    let rows = storage_volume::Entity::find()
        .filter(storage_volume::Column::Status.ne(VolumeStatus::Offline))
        .order_by_desc(storage_volume::Column::Priority)
        .all(db)
        .await?;

    let mut volumes = HashMap::new();
    let mut by_tier: HashMap<StorageTier, Vec<i32>> = HashMap::new();
    let mut providers: HashMap<i32, Arc<dyn StorageProvider>> = HashMap::new();
    let mut locals: HashMap<i32, Arc<LocalProvider>> = HashMap::new();

    for model in rows {
        let id = model.id;

        // Reuse the pooled provider when the connection config is
        // untouched (a priority or status edit must not drop pools).
        let reusable = previous.and_then(|prev| {
            let old = prev.volumes.get(&id)?;
            if old.connection_changed(&model) {
                return None;
            }
            Some((prev.providers.get(&id)?.clone(), prev.locals.get(&id).cloned()))
        });

        match reusable {
            Some((provider, local)) => {
                providers.insert(id, provider);
                if let Some(local) = local {
                    locals.insert(id, local);
                }
            }
            None => match connect_provider(&model).await {
                Ok((provider, local)) => {
                    providers.insert(id, provider);
                    if let Some(local) = local {
                        locals.insert(id, local);
                    }
                }
                Err(e) => {
                    // A volume whose provider cannot be built is left out
                    // of the index; retrieval against it surfaces
                    // unknown-volume until the next reload.
                    warn!(volume = %model.code, error = %e, "Provider construction failed");
                    continue;
                }
            },
        }

        by_tier.entry(model.tier).or_default().push(id);
        volumes.insert(id, model);
    }

    Ok(Snapshot {
        volumes,
        by_tier,
        providers,
        locals,
    })
}

async fn connect_provider(
    model: &VolumeModel,
) -> Result<(Arc<dyn StorageProvider>, Option<Arc<LocalProvider>>), VolumeError> {
    match model.kind {
        VolumeKind::Local => {
            let local = Arc::new(
                LocalProvider::new(model.base_path.clone().into())
                    .await
                    .map_err(VolumeError::Provider)?,
            );
            Ok((local.clone(), Some(local)))
        }
        VolumeKind::S3 => {
            let provider = ObjectStoreProvider::connect(ObjectStoreConfig {
                bucket: model.bucket.clone().unwrap_or_default(),
                prefix: Some(model.base_path.clone()),
                endpoint: model.endpoint.clone(),
                region: model.region.clone(),
                access_key: model.access_key.clone(),
                secret_key: model.secret_key.clone(),
            })
            .await
            .map_err(VolumeError::Provider)?;
            Ok((Arc::new(provider), None))
        }
    }
}
