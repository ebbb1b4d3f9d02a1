//! Gateway-facing ingest endpoints.
//!
//! Files are spooled to local disk and a queue message is published per
//! file; the indexing consumers do the heavy lifting. The handlers check
//! the disk monitor before touching storage and answer 507 while ingest
//! is blocked.

use axum::Json;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

use common::IngestMessage;

use crate::error::AppError;
use crate::state::AppState;
use crate::tenant::{Tenant, resolve_tenant};

pub fn ingest_body_limit(max_bytes: usize) -> DefaultBodyLimit {
    DefaultBodyLimit::max(max_bytes)
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub received: usize,
    pub queued: usize,
}

/// `POST /api/v1/{tenant}/ingest` — multipart/form-data, one or more
/// `files` fields.
#[instrument(skip(state, multipart), fields(tenant = %tenant.code))]
pub async fn ingest_files(
    tenant: Tenant,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    if state.disk.ingest_blocked() {
        return Err(AppError::DiskLow);
    }
    // Fail fast while the HOT tier has nowhere to write; the files would
    // only sit in the spool until redelivery timed out.
    state
        .volumes
        .active_write_volume(crate::entity::types::StorageTier::Hot)
        .await?;

    let spool_dir = std::path::Path::new(&state.config.ingest.spool_dir).join(&tenant.code);
    tokio::fs::create_dir_all(&spool_dir)
        .await
        .map_err(|e| AppError::StorageUnavailable(format!("spool unavailable: {e}")))?;

    let mut received = 0usize;
    let mut queued = 0usize;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("files") {
            continue; // Ignore unknown fields.
        }
        received += 1;

        let spool_path = spool_dir.join(format!("{}.dcm", Uuid::now_v7()));
        let mut file = tokio::fs::File::create(&spool_path)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("spool create failed: {e}")))?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::StorageUnavailable(format!("spool write failed: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("spool flush failed: {e}")))?;
        drop(file);

        state
            .queue
            .publish(&IngestMessage::new(
                spool_path.to_string_lossy().to_string(),
                tenant.code.clone(),
            ))
            .await?;
        queued += 1;
    }

    Ok(Json(IngestResponse { received, queued }))
}

#[derive(Deserialize)]
pub struct TransferCommitRequest {
    pub tenant_code: String,
    pub files: Vec<String>,
}

/// `POST /api/v1/transfer/commit` — enqueue files a transfer agent has
/// already placed on the spool host (absolute paths).
#[instrument(skip(state, request))]
pub async fn transfer_commit(
    State(state): State<AppState>,
    Json(request): Json<TransferCommitRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if state.disk.ingest_blocked() {
        return Err(AppError::DiskLow);
    }
    let tenant = resolve_tenant(&state, &request.tenant_code).await?;

    let mut queued = 0usize;
    for file in &request.files {
        state
            .queue
            .publish(&IngestMessage::new(file.clone(), tenant.code.clone()))
            .await?;
        queued += 1;
    }

    Ok(Json(IngestResponse {
        received: request.files.len(),
        queued,
    }))
}
