//! Cache-backed lookups shared by the retrieval handlers.
//!
//! `series_locations` is the load-bearing one: a miss batch-loads the
//! whole series through the 2-step query (series → (id, created_date),
//! then the single-partition instance scan), so N frame requests against
//! one series cost one round trip.

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::cache::{
    INSTANCE_LOCATIONS, InstanceLocation, SERIES_BY_STUDY, SERIES_METADATA_LOOKUP,
    SeriesLocations, SeriesMetadataLookup, SeriesSummary,
};
use crate::database::tenant_txn;
use crate::entity::clinical::{instance, series, study};
use crate::error::AppError;
use crate::state::AppState;

/// All instance locations of a series, keyed by SOP instance UID.
/// Colliding series UIDs across studies merge into one map.
pub async fn series_locations(
    state: &AppState,
    tenant_code: &str,
    series_uid: &str,
) -> Result<SeriesLocations, AppError> {
    let key = format!("{tenant_code}:{series_uid}");
    let state2 = state.clone();
    let tenant = tenant_code.to_string();
    let uid = series_uid.to_string();
    state
        .caches
        .get_with(&INSTANCE_LOCATIONS, &key, || async move {
            let txn = tenant_txn(&state2.db, &tenant).await?;
            let series_rows = series::Entity::find()
                .filter(series::Column::SeriesUid.eq(&uid))
                .all(&txn)
                .await?;
            if series_rows.is_empty() {
                return Err(AppError::NotFound(format!("series {uid}")));
            }

            let mut locations = SeriesLocations::new();
            for row in series_rows {
                let created_date = row.created_at.date_naive();
                let instances = instance::Entity::find()
                    .filter(instance::Column::SeriesFk.eq(row.id))
                    .filter(instance::Column::CreatedDate.eq(created_date))
                    .all(&txn)
                    .await?;
                for inst in instances {
                    locations.insert(
                        inst.sop_instance_uid.clone(),
                        InstanceLocation {
                            volume_id: inst.volume_id,
                            path: inst.storage_path,
                            transfer_syntax_uid: inst.transfer_syntax_uid,
                            num_frames: inst.num_frames,
                            file_size: inst.file_size,
                        },
                    );
                }
            }
            txn.commit().await?;
            Ok(locations)
        })
        .await
}

/// Metadata-cache coordinates for a series.
pub async fn series_lookup(
    state: &AppState,
    tenant_code: &str,
    series_uid: &str,
) -> Result<SeriesMetadataLookup, AppError> {
    let key = format!("{tenant_code}:{series_uid}");
    let state2 = state.clone();
    let tenant = tenant_code.to_string();
    let uid = series_uid.to_string();
    state
        .caches
        .get_with(&SERIES_METADATA_LOOKUP, &key, || async move {
            let txn = tenant_txn(&state2.db, &tenant).await?;
            let row = series::Entity::find()
                .filter(series::Column::SeriesUid.eq(&uid))
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("series {uid}")))?;
            txn.commit().await?;

            let provider_kind = match row.metadata_volume_id {
                Some(volume_id) => state2.volumes.volume(volume_id).await.map(|v| v.kind),
                None => None,
            };
            Ok(SeriesMetadataLookup {
                series_id: row.id,
                created_date: row.created_at.date_naive(),
                metadata_volume_id: row.metadata_volume_id,
                metadata_path: row.metadata_path,
                provider_kind,
            })
        })
        .await
}

/// Series summaries under a study UID (all study rows carrying it).
pub async fn series_by_study(
    state: &AppState,
    tenant_code: &str,
    study_uid: &str,
) -> Result<Vec<SeriesSummary>, AppError> {
    let key = format!("{tenant_code}:{study_uid}");
    let state2 = state.clone();
    let tenant = tenant_code.to_string();
    let uid = study_uid.to_string();
    state
        .caches
        .get_with(&SERIES_BY_STUDY, &key, || async move {
            let txn = tenant_txn(&state2.db, &tenant).await?;
            let study_rows = study::Entity::find()
                .filter(study::Column::StudyUid.eq(&uid))
                .all(&txn)
                .await?;
            if study_rows.is_empty() {
                return Err(AppError::NotFound(format!("study {uid}")));
            }

            let study_ids: Vec<i64> = study_rows.iter().map(|s| s.id).collect();
            let rows = series::Entity::find()
                .filter(series::Column::StudyFk.is_in(study_ids))
                .order_by_asc(series::Column::SeriesNumber)
                .all(&txn)
                .await?;
            txn.commit().await?;

            Ok(rows
                .into_iter()
                .map(|row| SeriesSummary {
                    series_id: row.id,
                    series_uid: row.series_uid,
                    modality: row.modality,
                    series_number: row.series_number,
                    description: row.description,
                    num_instances: row.num_instances,
                    created_date: row.created_at.date_naive(),
                })
                .collect())
        })
        .await
}
