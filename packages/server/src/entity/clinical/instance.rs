use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One stored SOP instance. Range-partitioned monthly on `created_date`,
/// which always equals the owning series' `created_at::date` so a series'
/// instances never straddle partitions. Uniqueness on
/// (series_fk, sop_instance_uid) is enforced at the application layer:
/// the partitioning discipline forbids a unique index that excludes the
/// partition key.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "instance")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// Partition key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub created_date: Date,

    #[sea_orm(indexed)]
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,

    /// Current transfer syntax; rewritten by the compression worker.
    pub transfer_syntax_uid: String,
    pub num_frames: i32,
    pub file_size: i64,

    /// Weak reference into the shared volume registry.
    pub volume_id: i32,
    pub storage_path: String,

    #[sea_orm(indexed)]
    pub series_fk: i64,

    // Denormalised for retrieval paths that enter by UID.
    pub series_uid: String,
    pub study_uid: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
