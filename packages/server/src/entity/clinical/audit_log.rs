use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Originating component or admin identity.
    pub actor: String,

    pub action: String,

    /// Affected UID or entity reference.
    pub target: String,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<serde_json::Value>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
