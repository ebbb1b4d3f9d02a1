use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Tenant registry. Rows are provisioned externally together with the
/// tenant's schema; the archive only reads the list.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tenant")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Stable identifier, also the schema suffix (`tenant_{code}`).
    /// Restricted to `[a-z0-9_]+`.
    #[sea_orm(unique)]
    pub code: String,

    pub display_name: String,

    #[sea_orm(default_value = true, indexed)]
    pub active: bool,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
