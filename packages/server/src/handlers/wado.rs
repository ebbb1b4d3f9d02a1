//! WADO-RS retrieval: single instance, study/series multipart, series
//! metadata, and frame extraction.
//!
//! Multipart bodies are written as raw `\r\n--{boundary}` sequences —
//! byte-exact framing is part of the wire contract, so no multipart
//! library sits between us and the socket. Responses stream: the encoder
//! suspends while the client drains, and nothing is buffered whole.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{instrument, warn};
use uuid::Uuid;

use common::dicom::{FrameKind, extract_frame, ts};
use common::storage::StorageProvider;

use crate::cache::InstanceLocation;
use crate::database::tenant_txn;
use crate::entity::clinical::{instance, study};
use crate::entity::types::VolumeKind;
use crate::error::AppError;
use crate::locator;
use crate::metadata;
use crate::state::AppState;
use crate::tenant::Tenant;

const CONTENT_TYPE_DICOM: &str = "application/dicom";

// ---------------------------------------------------------------------------
// Multipart framing

fn make_boundary() -> String {
    Uuid::new_v4().simple().to_string()
}

/// `\r\n--{boundary}\r\nContent-Type: {type}\r\n\r\n`
fn part_header(boundary: &str, content_type: &str) -> Bytes {
    Bytes::from(format!(
        "\r\n--{boundary}\r\nContent-Type: {content_type}\r\n\r\n"
    ))
}

/// `\r\n--{boundary}--\r\n`
fn close_delimiter(boundary: &str) -> Bytes {
    Bytes::from(format!("\r\n--{boundary}--\r\n"))
}

type PartSender = mpsc::Sender<Result<Bytes, std::io::Error>>;

fn multipart_response(content_type: String) -> (PartSender, Response) {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    let response = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("static response build");
    (tx, response)
}

/// Forward a provider stream into the channel in chunks.
async fn pump_object(
    provider: &dyn StorageProvider,
    path: &str,
    tx: &PartSender,
) -> Result<(), std::io::Error> {
    let mut reader = provider
        .read(path)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            // Client went away; unwind closes the stream.
            return Err(std::io::Error::other("client disconnected"));
        }
    }
}

// ---------------------------------------------------------------------------
// Instance retrieval

/// `GET .../studies/{study}/series/{series}/instances/{sop}` — one
/// `application/dicom` body at the native transfer syntax.
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn retrieve_instance(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, _study_uid, series_uid, sop_uid)): Path<(String, String, String, String)>,
) -> Result<Response, AppError> {
    let locations = locator::series_locations(&state, &tenant.code, &series_uid).await?;
    let location = locations
        .get(&sop_uid)
        .ok_or_else(|| AppError::NotFound(format!("instance {sop_uid}")))?;

    let provider = state.volumes.provider(location.volume_id).await?;
    let reader = provider.read(&location.path).await?;

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, CONTENT_TYPE_DICOM)
        .header(header::CONTENT_LENGTH, location.file_size.to_string())
        .body(Body::from_stream(ReaderStream::new(reader)))
        .expect("static response build"))
}

/// `GET .../studies/{study}/series/{series}` — multipart/related of
/// `application/dicom` parts, one per instance.
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn retrieve_series(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, _study_uid, series_uid)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let locations = locator::series_locations(&state, &tenant.code, &series_uid).await?;
    if locations.is_empty() {
        return Err(AppError::NotFound(format!("series {series_uid}")));
    }
    let targets: Vec<InstanceLocation> = locations.into_values().collect();
    stream_dicom_parts(state, targets).await
}

/// `GET .../studies/{study}` — multipart/related of every instance in
/// every series row carrying the study UID.
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn retrieve_study(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, study_uid)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let study_ids: Vec<i64> = study::Entity::find()
        .filter(study::Column::StudyUid.eq(&study_uid))
        .all(&txn)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    if study_ids.is_empty() {
        return Err(AppError::NotFound(format!("study {study_uid}")));
    }

    let summaries = locator::series_by_study(&state, &tenant.code, &study_uid).await?;
    let mut targets = Vec::new();
    for summary in &summaries {
        let instances = instance::Entity::find()
            .filter(instance::Column::SeriesFk.eq(summary.series_id))
            .filter(instance::Column::CreatedDate.eq(summary.created_date))
            .all(&txn)
            .await?;
        for inst in instances {
            targets.push(InstanceLocation {
                volume_id: inst.volume_id,
                path: inst.storage_path,
                transfer_syntax_uid: inst.transfer_syntax_uid,
                num_frames: inst.num_frames,
                file_size: inst.file_size,
            });
        }
    }
    txn.commit().await?;

    if targets.is_empty() {
        return Err(AppError::NotFound(format!("study {study_uid}")));
    }
    stream_dicom_parts(state, targets).await
}

async fn stream_dicom_parts(
    state: AppState,
    targets: Vec<InstanceLocation>,
) -> Result<Response, AppError> {
    let boundary = make_boundary();
    let (tx, response) = multipart_response(format!(
        "multipart/related; type=\"{CONTENT_TYPE_DICOM}\"; boundary={boundary}"
    ));

    tokio::spawn(async move {
        for target in &targets {
            let provider = match state.volumes.provider(target.volume_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Skipping part on unknown volume");
                    continue;
                }
            };
            if tx
                .send(Ok(part_header(&boundary, CONTENT_TYPE_DICOM)))
                .await
                .is_err()
            {
                return;
            }
            if let Err(e) = pump_object(provider.as_ref(), &target.path, &tx).await {
                warn!(path = %target.path, error = %e, "Part stream aborted");
                return;
            }
        }
        let _ = tx.send(Ok(close_delimiter(&boundary))).await;
    });

    Ok(response)
}

// ---------------------------------------------------------------------------
// Series metadata

/// `GET .../series/{series}/metadata` — the cached DICOM-JSON projection.
///
/// On a missing cache file the fallback depends on where the series
/// lives: a local volume is cheap to re-read, so the projection is built
/// for this response and persisted asynchronously; an object store pays
/// one GET per instance, so it is built and persisted before answering.
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn series_metadata(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, _study_uid, series_uid)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let lookup = locator::series_lookup(&state, &tenant.code, &series_uid).await?;

    if let (Some(volume_id), Some(path)) = (lookup.metadata_volume_id, lookup.metadata_path.clone())
    {
        let provider = state.volumes.provider(volume_id).await?;
        match provider.read(&path).await {
            Ok(reader) => {
                return Ok(Response::builder()
                    .header(header::CONTENT_TYPE, super::dicom_json::CONTENT_TYPE_DICOM_JSON)
                    .body(Body::from_stream(ReaderStream::new(reader)))
                    .expect("static response build"));
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Metadata cache file unreadable, rebuilding");
            }
        }
    }

    // Which kind of volume holds the instances decides the fallback.
    let instance_kind = instance_volume_kind(&state, &tenant.code, &series_uid).await?;
    match instance_kind {
        Some(VolumeKind::Local) | None => {
            let txn = tenant_txn(&state.db, &tenant.code).await?;
            let (projection, _) =
                metadata::build_projection(&state, lookup.series_id, lookup.created_date, &txn)
                    .await?;
            txn.commit().await?;
            metadata::schedule_rebuild(state.clone(), tenant.code.clone(), series_uid.clone());
            let body = serde_json::to_vec(&projection)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            Ok(Response::builder()
                .header(header::CONTENT_TYPE, super::dicom_json::CONTENT_TYPE_DICOM_JSON)
                .body(Body::from(body))
                .expect("static response build"))
        }
        Some(VolumeKind::S3) => {
            metadata::rebuild_series_metadata(&state, &tenant.code, &series_uid).await?;
            let lookup = locator::series_lookup(&state, &tenant.code, &series_uid).await?;
            let (Some(volume_id), Some(path)) = (lookup.metadata_volume_id, lookup.metadata_path)
            else {
                return Err(AppError::NotFound(format!("series {series_uid} is empty")));
            };
            let provider = state.volumes.provider(volume_id).await?;
            let reader = provider.read(&path).await?;
            Ok(Response::builder()
                .header(header::CONTENT_TYPE, super::dicom_json::CONTENT_TYPE_DICOM_JSON)
                .body(Body::from_stream(ReaderStream::new(reader)))
                .expect("static response build"))
        }
    }
}

async fn instance_volume_kind(
    state: &AppState,
    tenant_code: &str,
    series_uid: &str,
) -> Result<Option<VolumeKind>, AppError> {
    let locations = locator::series_locations(state, tenant_code, series_uid).await?;
    let Some(location) = locations.values().next() else {
        return Ok(None);
    };
    Ok(state
        .volumes
        .volume(location.volume_id)
        .await
        .map(|v| v.kind))
}

// ---------------------------------------------------------------------------
// Frame retrieval

/// `GET .../instances/{sop}/frames/{frameList}` — selected frames as
/// `application/octet-stream` parts, at the native transfer syntax. V1
/// strategy: one freshly opened stream per frame.
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn retrieve_frames(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, _study_uid, series_uid, sop_uid, frame_list)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, AppError> {
    let locations = locator::series_locations(&state, &tenant.code, &series_uid).await?;
    let location = locations
        .get(&sop_uid)
        .ok_or_else(|| AppError::NotFound(format!("instance {sop_uid}")))?
        .clone();

    let frames = parse_frame_list(&frame_list, location.num_frames)?;
    let compressed = !ts::is_uncompressed(&location.transfer_syntax_uid);
    let kind = FrameKind::classify(
        &location.transfer_syntax_uid,
        location.num_frames.max(1) as u32,
    );

    let part_type = if compressed {
        format!(
            "application/octet-stream; transfer-syntax={}",
            location.transfer_syntax_uid
        )
    } else {
        "application/octet-stream".to_string()
    };
    let boundary = make_boundary();
    let (tx, response) = multipart_response(format!(
        "multipart/related; type=\"application/octet-stream\"{}; boundary={boundary}",
        if compressed {
            format!("; transfer-syntax={}", location.transfer_syntax_uid)
        } else {
            String::new()
        }
    ));

    tokio::spawn(async move {
        for frame_number in frames {
            let frame = match read_frame(&state, &location, frame_number, kind).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(frame = frame_number, error = ?e, "Frame extraction failed mid-stream");
                    return;
                }
            };
            if tx.send(Ok(part_header(&boundary, &part_type))).await.is_err() {
                return;
            }
            if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Ok(close_delimiter(&boundary))).await;
    });

    Ok(response)
}

/// Extract one frame on the blocking pool over a fresh provider stream.
async fn read_frame(
    state: &AppState,
    location: &InstanceLocation,
    frame_number: u32,
    kind: FrameKind,
) -> Result<Vec<u8>, AppError> {
    let provider = state.volumes.provider(location.volume_id).await?;
    let reader = provider.read(&location.path).await?;
    let bytes = tokio::task::spawn_blocking(move || {
        let bridge = SyncIoBridge::new(reader);
        let mut out = Vec::new();
        extract_frame(bridge, frame_number, kind, &mut out)?;
        Ok::<_, common::dicom::DicomError>(out)
    })
    .await
    .map_err(|e| AppError::Internal(format!("frame task failed: {e}")))??;
    Ok(bytes)
}

/// Comma-separated 1-based frame numbers, sorted ascending and validated
/// against the instance's frame count.
fn parse_frame_list(frame_list: &str, num_frames: i32) -> Result<Vec<u32>, AppError> {
    let mut frames = Vec::new();
    for token in frame_list.split(',') {
        let n: u32 = token
            .trim()
            .parse()
            .map_err(|_| AppError::BadFrameList(format!("bad frame number '{token}'")))?;
        frames.push(n);
    }
    if frames.is_empty() {
        return Err(AppError::BadFrameList("empty frame list".into()));
    }
    frames.sort_unstable();

    let total = num_frames.max(0) as u32;
    let min = frames[0];
    let max = *frames.last().expect("non-empty");
    if min < 1 || max > total {
        return Err(AppError::FrameOutOfRange(format!(
            "frames {min}..{max} outside 1..{total}"
        )));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_framing_is_byte_exact() {
        assert_eq!(
            &part_header("B", "application/octet-stream")[..],
            b"\r\n--B\r\nContent-Type: application/octet-stream\r\n\r\n"
        );
        assert_eq!(&close_delimiter("B")[..], b"\r\n--B--\r\n");
    }

    #[test]
    fn frame_list_parses_sorts_and_validates() {
        assert_eq!(parse_frame_list("5", 20).unwrap(), vec![5]);
        assert_eq!(parse_frame_list("10,1,5", 20).unwrap(), vec![1, 5, 10]);

        assert!(matches!(
            parse_frame_list("0", 20),
            Err(AppError::FrameOutOfRange(_))
        ));
        assert!(matches!(
            parse_frame_list("21", 20),
            Err(AppError::FrameOutOfRange(_))
        ));
        assert!(matches!(
            parse_frame_list("1,x", 20),
            Err(AppError::BadFrameList(_))
        ));
        assert!(matches!(
            parse_frame_list("", 20),
            Err(AppError::BadFrameList(_))
        ));
    }
}
