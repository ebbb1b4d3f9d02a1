//! Per-series DICOM-JSON projection cache.
//!
//! The projection is a JSON array with one PS3.18 object per instance,
//! in instance-number order, pixel data omitted. It is stored as a plain
//! blob on the same volume as the series' instances; the series row holds
//! the (volume, path) pair and a NULL pair means "rebuild me".

use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use common::dicom::{dataset_to_json, parse_header};

use crate::cache::SERIES_METADATA_LOOKUP;
use crate::database::tenant_txn;
use crate::entity::clinical::{instance, series};
use crate::error::AppError;
use crate::state::AppState;

/// `{tenant}/series-meta/{uid[0:2]}/{uid[2:4]}/{uid}.json`
pub fn series_meta_path(tenant_code: &str, series_uid: &str) -> String {
    let head = series_uid.get(0..2).unwrap_or(series_uid);
    let next = series_uid
        .get(2..4)
        .or_else(|| series_uid.get(2..))
        .unwrap_or("");
    format!("{tenant_code}/series-meta/{head}/{next}/{series_uid}.json")
}

/// Build the JSON projection for one series row by reading every instance
/// file. Returns the array plus the volume the instances live on.
pub async fn build_projection(
    state: &AppState,
    series_id: i64,
    created_date: chrono::NaiveDate,
    txn: &sea_orm::DatabaseTransaction,
) -> Result<(Vec<serde_json::Value>, Option<i32>), AppError> {
    let instances = instance::Entity::find()
        .filter(instance::Column::SeriesFk.eq(series_id))
        .filter(instance::Column::CreatedDate.eq(created_date))
        .order_by_asc(instance::Column::InstanceNumber)
        .all(txn)
        .await?;

    let mut projection = Vec::with_capacity(instances.len());
    let mut volume_id = None;
    for row in &instances {
        volume_id.get_or_insert(row.volume_id);
        let provider = state.volumes.provider(row.volume_id).await?;
        let mut reader = provider.read(&row.storage_path).await?;
        let mut bytes = Vec::with_capacity(row.file_size.max(0) as usize);
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;
        let header = parse_header(&bytes[..])?;
        projection.push(dataset_to_json(header.attributes()));
    }
    Ok((projection, volume_id))
}

/// Rebuild and persist the metadata cache for every series row carrying
/// this UID, then point the series rows at the new file.
pub async fn rebuild_series_metadata(
    state: &AppState,
    tenant_code: &str,
    series_uid: &str,
) -> Result<(), AppError> {
    let txn = tenant_txn(&state.db, tenant_code).await?;
    let rows = series::Entity::find()
        .filter(series::Column::SeriesUid.eq(series_uid))
        .all(&txn)
        .await?;

    for row in rows {
        let created_date = row.created_at.date_naive();
        let (projection, volume_id) =
            build_projection(state, row.id, created_date, &txn).await?;
        let Some(volume_id) = volume_id else {
            // Series with no instances yet; nothing to persist.
            continue;
        };

        let body = serde_json::to_vec(&projection)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let path = series_meta_path(tenant_code, series_uid);
        let provider = state.volumes.provider(volume_id).await?;
        let len = body.len() as u64;
        provider
            .write(&path, Box::new(std::io::Cursor::new(body)), len)
            .await?;

        let update = series::ActiveModel {
            id: Set(row.id),
            metadata_volume_id: Set(Some(volume_id)),
            metadata_path: Set(Some(path)),
            ..Default::default()
        };
        update.update(&txn).await?;
        info!(tenant = tenant_code, series = series_uid, entries = projection.len(),
            "Series metadata cache rebuilt");
    }
    txn.commit().await.map_err(AppError::from)?;

    state
        .caches
        .evict(&SERIES_METADATA_LOOKUP, &format!("{tenant_code}:{series_uid}"))
        .await;
    Ok(())
}

/// Fire-and-forget rebuild used after ingest commits and migrations.
pub fn schedule_rebuild(state: AppState, tenant_code: String, series_uid: String) {
    tokio::spawn(async move {
        if let Err(e) = rebuild_series_metadata(&state, &tenant_code, &series_uid).await {
            warn!(tenant = %tenant_code, series = %series_uid, error = ?e,
                "Async metadata rebuild failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_path_shards_by_uid_prefix() {
        assert_eq!(
            series_meta_path("h1", "1.2.840.113619.2"),
            "h1/series-meta/1./2./1.2.840.113619.2.json"
        );
    }

    #[test]
    fn meta_path_tolerates_short_uids() {
        assert_eq!(series_meta_path("h1", "1.2"), "h1/series-meta/1./2/1.2.json");
        assert_eq!(series_meta_path("h1", "1"), "h1/series-meta/1//1.json");
    }
}
