use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::types::TaskStatus;

/// One study-level compression pass.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "compression_task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub rule_id: Option<i32>,

    #[sea_orm(indexed)]
    pub study_fk: i64,

    pub study_uid: String,

    /// Target transfer syntax UID.
    pub compression_type: String,

    #[sea_orm(indexed)]
    pub status: TaskStatus,

    pub instances_converted: i32,
    pub instances_skipped: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
