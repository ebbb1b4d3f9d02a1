use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A study. `study_uid` is NOT unique: the same field-collected UID under
/// two distinct patients produces two rows with distinct `public_id`
/// (`SHA1(raw-pid || "|" || study-uid)`).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "study")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub public_id: String,

    #[sea_orm(indexed)]
    pub study_uid: String,

    #[sea_orm(indexed)]
    pub patient_fk: i64,

    pub description: Option<String>,
    pub accession_number: Option<String>,
    /// DICOM DA form, fixed width, so a lexical BETWEEN implements the
    /// QIDO date-range match.
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub referring_physician: Option<String>,

    pub num_series: i32,
    pub num_instances: i32,
    pub study_size: i64,

    pub version: i32,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    /// Touched by study-list queries; drives LAST_ACCESS_DAYS rules.
    pub last_accessed_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
