use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::types::{LifecycleAction, LifecycleCondition, StorageTier};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lifecycle_rule")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(default_value = true)]
    pub enabled: bool,

    pub action: LifecycleAction,

    pub source_tier: StorageTier,

    /// Required for MIGRATE.
    pub target_tier: Option<StorageTier>,

    pub condition: LifecycleCondition,

    pub condition_days: i32,

    /// MIGRATE only: remove the source file once the copy is verified.
    #[sea_orm(default_value = false)]
    pub delete_source: bool,

    /// COMPRESS only: target transfer syntax UID.
    pub compression_type: Option<String>,

    /// NULL applies the rule to every tenant.
    pub tenant_code: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
