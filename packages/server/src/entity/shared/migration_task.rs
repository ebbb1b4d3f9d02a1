use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::types::TaskStatus;

/// One instance file move between volumes. Lives in the shared schema and
/// addresses the tenant row by (tenant_code, instance id, partition date).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "migration_task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub rule_id: Option<i32>,

    #[sea_orm(indexed)]
    pub tenant_code: String,

    pub instance_id: i64,
    pub instance_created_date: Date,

    /// Denormalised so the worker can evict and rebuild series state
    /// without an extra lookup.
    pub series_uid: String,

    pub source_volume_id: i32,
    pub target_volume_id: i32,

    pub delete_source: bool,

    #[sea_orm(indexed)]
    pub status: TaskStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
