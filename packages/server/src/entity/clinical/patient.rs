use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A patient as collected from the field. Identified by
/// `public_id = SHA1(raw patient id)`; the numeric id is the stable
/// ownership key and survives corrections.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "patient")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub public_id: String,

    /// Raw PatientID as received; `NOPID_{study-uid}` when synthesised.
    pub patient_id: String,

    pub name: Option<String>,
    /// DICOM DA form (yyyymmdd), kept verbatim.
    pub birth_date: Option<String>,
    pub sex: Option<String>,

    /// True when the id was synthesised because the object carried none.
    #[sea_orm(default_value = false)]
    pub is_provisional: bool,

    pub num_studies: i32,

    /// Optimistic-lock version, checked by correction updates.
    pub version: i32,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
