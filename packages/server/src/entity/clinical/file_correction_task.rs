use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::types::TaskStatus;

/// Asynchronous half of a patient-id correction: recompute the
/// `public_id` of every study owned by the corrected patient. Series and
/// instance rows link by numeric FK and never need touching.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_correction_task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub patient_fk: i64,

    /// The corrected raw patient id already written to the patient row.
    pub new_patient_id: String,

    #[sea_orm(indexed)]
    pub status: TaskStatus,

    pub studies_updated: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
