//! STOW-RS store endpoint: `POST /dicomweb/{tenant}/studies`.
//!
//! The request is `multipart/related; type="application/dicom"`. Parsing
//! is delegated to a conformant multipart parser rather than hand-rolled
//! boundary scanning; a dangling boundary is a 400, never a partial
//! store. Accepted parts go through the same resolver → storage → bulk
//! upsert path as queued ingest, in one transaction.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{instrument, warn};

use common::dicom::parse_header;
use common::storage::BoxReader;

use crate::cache::{INSTANCE_LOCATIONS, SERIES_BY_STUDY, SERIES_METADATA_LOOKUP};
use crate::database::tenant_txn;
use crate::entity::types::StorageTier;
use crate::error::AppError;
use crate::handlers::dicom_json::CONTENT_TYPE_DICOM_JSON;
use crate::metadata::schedule_rebuild;
use crate::repo::{self, IngestItem};
use crate::state::AppState;
use crate::tenant::Tenant;

struct FailedSop {
    sop_class_uid: String,
    sop_instance_uid: String,
    /// PS3.18 failure reason code.
    reason: u32,
}

const REASON_CANNOT_UNDERSTAND: u32 = 0xC000;
const REASON_OUT_OF_RESOURCES: u32 = 0xA700;

#[instrument(skip(state, headers, body), fields(tenant = %tenant.code))]
pub async fn store_instances(
    tenant: Tenant,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if state.disk.ingest_blocked() {
        return Err(AppError::DiskLow);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing Content-Type".into()))?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| AppError::Validation(format!("Bad multipart Content-Type: {e}")))?;
    let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);

    let (volume, provider) = state.volumes.active_write_volume(StorageTier::Hot).await?;
    let template = state.volumes.template_for(&volume)?;

    let mut items: Vec<IngestItem> = Vec::new();
    let mut failed: Vec<FailedSop> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed multipart part: {e}")))?;

        let header = match parse_header(&bytes[..]) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "Rejecting unparseable STOW part");
                failed.push(FailedSop {
                    sop_class_uid: String::new(),
                    sop_instance_uid: String::new(),
                    reason: REASON_CANNOT_UNDERSTAND,
                });
                continue;
            }
        };

        let storage_path = template.resolve(&tenant.code, header.attributes(), Utc::now());
        let file_size = bytes.len() as i64;
        let reader: BoxReader = Box::new(std::io::Cursor::new(bytes.to_vec()));
        match provider.write(&storage_path, reader, file_size as u64).await {
            Ok(()) => items.push(IngestItem {
                header,
                volume_id: volume.id,
                storage_path,
                file_size,
            }),
            Err(e) => {
                warn!(error = %e, "STOW storage write failed");
                failed.push(FailedSop {
                    sop_class_uid: header.sop_class_uid.clone(),
                    sop_instance_uid: header.sop_uid.clone(),
                    reason: REASON_OUT_OF_RESOURCES,
                });
            }
        }
    }

    if items.is_empty() && failed.is_empty() {
        return Err(AppError::Validation("Empty STOW request".into()));
    }

    let outcome = if items.is_empty() {
        Default::default()
    } else {
        let txn = tenant_txn(&state.db, &tenant.code).await?;
        let outcome = repo::upsert_batch(&txn, &items, "stow-rs").await?;
        txn.commit().await?;
        outcome
    };

    for affected in &outcome.affected_series {
        let series_key = format!("{}:{}", tenant.code, affected.series_uid);
        state.caches.evict(&INSTANCE_LOCATIONS, &series_key).await;
        state.caches.evict(&SERIES_METADATA_LOOKUP, &series_key).await;
        state
            .caches
            .evict(
                &SERIES_BY_STUDY,
                &format!("{}:{}", tenant.code, affected.study_uid),
            )
            .await;
        schedule_rebuild(state.clone(), tenant.code.clone(), affected.series_uid.clone());
    }

    // 200 all stored, 202 partial, 409 nothing stored.
    let status = if failed.is_empty() {
        StatusCode::OK
    } else if items.is_empty() {
        StatusCode::CONFLICT
    } else {
        StatusCode::ACCEPTED
    };

    let referenced: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            json!({
                "00081150": { "vr": "UI", "Value": [item.header.sop_class_uid] },
                "00081155": { "vr": "UI", "Value": [item.header.sop_uid] },
                "00081190": { "vr": "UR", "Value": [format!(
                    "/dicomweb/{}/studies/{}/series/{}/instances/{}",
                    tenant.code, item.header.study_uid, item.header.series_uid, item.header.sop_uid
                )] },
            })
        })
        .collect();
    let failures: Vec<serde_json::Value> = failed
        .iter()
        .map(|f| {
            json!({
                "00081150": { "vr": "UI", "Value": [f.sop_class_uid] },
                "00081155": { "vr": "UI", "Value": [f.sop_instance_uid] },
                "00081197": { "vr": "US", "Value": [f.reason] },
            })
        })
        .collect();

    let mut response_body = serde_json::Map::new();
    if !referenced.is_empty() {
        response_body.insert(
            "00081199".into(),
            json!({ "vr": "SQ", "Value": referenced }),
        );
    }
    if !failures.is_empty() {
        response_body.insert(
            "00081198".into(),
            json!({ "vr": "SQ", "Value": failures }),
        );
    }

    Ok((
        status,
        [(header::CONTENT_TYPE, CONTENT_TYPE_DICOM_JSON)],
        serde_json::Value::Object(response_body).to_string(),
    )
        .into_response())
}
