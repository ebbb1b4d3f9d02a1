use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A series, unique on (study_fk, series_uid). `created_at::date` is the
/// partition key for every instance row beneath it.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "series")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique_key = "series_study_uid")]
    pub study_fk: i64,

    #[sea_orm(unique_key = "series_study_uid")]
    pub series_uid: String,

    pub modality: String,
    pub series_number: Option<i32>,
    pub description: Option<String>,
    pub body_part: Option<String>,
    pub institution: Option<String>,
    pub station_name: Option<String>,

    pub num_instances: i32,
    pub series_size: i64,

    /// Set once a COMPRESS pass converted the series.
    pub compress_tsuid: Option<String>,
    pub compress_time: Option<DateTimeUtc>,

    /// Location of the per-series metadata cache file; NULL means the
    /// projection must be rebuilt.
    pub metadata_volume_id: Option<i32>,
    pub metadata_path: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
