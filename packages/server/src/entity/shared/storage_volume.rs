use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::types::{StorageTier, VolumeKind, VolumeStatus};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_volume")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub code: String,

    pub kind: VolumeKind,

    /// Root directory for local volumes, key prefix for object stores.
    pub base_path: String,

    #[sea_orm(indexed)]
    pub tier: StorageTier,

    #[sea_orm(indexed)]
    pub status: VolumeStatus,

    /// Higher priority wins when several volumes are writable in a tier.
    pub priority: i32,

    /// Overrides the deployment-wide default path template.
    pub path_template: Option<String>,

    // Object-store connection settings.
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True when `other` differs in any field that affects the provider's
    /// connection, meaning a cached provider must be rebuilt.
    pub fn connection_changed(&self, other: &Model) -> bool {
        self.kind != other.kind
            || self.base_path != other.base_path
            || self.bucket != other.bucket
            || self.endpoint != other.endpoint
            || self.region != other.region
            || self.access_key != other.access_key
            || self.secret_key != other.secret_key
    }
}
