//! Indexing consumer pool.
//!
//! Each worker loops over the active tenants, pulling one queue batch per
//! tenant: parse header, place the file on the HOT tier, collect the
//! batch, upsert in one tenant transaction. The queue wrapper
//! acknowledges the whole batch when the handler returns cleanly and
//! requeues it otherwise, so a failed transaction means redelivery, not
//! loss. Files that fail to parse or store are quarantined and their
//! messages acknowledged with the rest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use common::IngestMessage;
use common::dicom::parse_header;
use common::storage::BoxReader;

use crate::cache::{INSTANCE_LOCATIONS, SERIES_BY_STUDY, SERIES_METADATA_LOOKUP};
use crate::database::tenant_txn;
use crate::entity::types::StorageTier;
use crate::error::AppError;
use crate::metadata::schedule_rebuild;
use crate::repo::{self, AffectedSeries, IngestItem};
use crate::state::AppState;
use crate::tenant::active_tenants;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn the consumer pool plus a watchdog that respawns any loop that
/// dies (uncaught panics included).
pub fn spawn_consumers(state: AppState) -> JoinHandle<()> {
    let workers = state.config.ingest.consumer_threads.max(1);
    tokio::spawn(async move {
        let mut handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| spawn_worker(state.clone(), id))
            .collect();

        let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
        loop {
            interval.tick().await;
            for (id, handle) in handles.iter_mut().enumerate() {
                if handle.is_finished() {
                    error!(worker = id, "Consumer loop died, restarting");
                    *handle = spawn_worker(state.clone(), id);
                }
            }
        }
    })
}

fn spawn_worker(state: AppState, worker_id: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(worker = worker_id, "Ingest consumer started");
        loop {
            if let Err(e) = run_iteration(&state).await {
                error!(worker = worker_id, error = ?e, "Consumer iteration failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    })
}

async fn run_iteration(state: &AppState) -> Result<(), AppError> {
    let tenants = active_tenants(state).await?;
    for tenant_code in &tenants {
        match process_tenant(state, tenant_code).await {
            Ok(0) => {}
            Ok(n) => info!(tenant = %tenant_code, indexed = n, "Ingest batch committed"),
            Err(e) => {
                // This tenant's batch stays queued; other tenants proceed.
                error!(tenant = %tenant_code, error = ?e, "Ingest batch failed");
            }
        }
    }
    Ok(())
}

async fn process_tenant(state: &AppState, tenant_code: &str) -> Result<usize, AppError> {
    let mut inserted = 0usize;
    let mut affected: Vec<AffectedSeries> = Vec::new();

    let acked = state
        .queue
        .consume_for_tenant(tenant_code, state.config.ingest.batch_size, |messages| {
            handle_batch(state, tenant_code, messages, &mut inserted, &mut affected)
        })
        .await?;
    if acked == 0 {
        return Ok(0);
    }

    // Post-commit cache coherence: evict everything the batch touched and
    // refresh the series projections in the background.
    for series in &affected {
        let series_key = format!("{tenant_code}:{}", series.series_uid);
        state.caches.evict(&INSTANCE_LOCATIONS, &series_key).await;
        state.caches.evict(&SERIES_METADATA_LOOKUP, &series_key).await;
        state
            .caches
            .evict(&SERIES_BY_STUDY, &format!("{tenant_code}:{}", series.study_uid))
            .await;
        schedule_rebuild(
            state.clone(),
            tenant_code.to_string(),
            series.series_uid.clone(),
        );
    }

    Ok(inserted)
}

async fn handle_batch(
    state: &AppState,
    tenant_code: &str,
    messages: Vec<IngestMessage>,
    inserted: &mut usize,
    affected: &mut Vec<AffectedSeries>,
) -> Result<(), AppError> {
    // Resolve the write target once per batch; no HOT volume means the
    // batch must wait for redelivery, not be quarantined.
    let (volume, provider) = state
        .volumes
        .active_write_volume(StorageTier::Hot)
        .await?;
    let template = state.volumes.template_for(&volume)?;

    let mut items: Vec<IngestItem> = Vec::with_capacity(messages.len());
    let mut spooled: Vec<PathBuf> = Vec::new();
    for message in &messages {
        match index_file(tenant_code, message, volume.id, provider.as_ref(), &template).await {
            Ok(item) => {
                items.push(item);
                spooled.push(PathBuf::from(&message.file_path));
            }
            Err(e) => {
                warn!(tenant = %tenant_code, file = %message.file_path, error = ?e,
                    "Quarantining unreadable ingest file");
                quarantine(state, tenant_code, &message.file_path).await;
            }
        }
    }

    let txn = tenant_txn(&state.db, tenant_code).await?;
    let outcome = repo::upsert_batch(&txn, &items, "ingest-consumer").await?;
    txn.commit().await?;

    for path in spooled {
        let _ = tokio::fs::remove_file(&path).await;
    }

    *inserted = outcome.inserted_instances;
    *affected = outcome.affected_series;
    Ok(())
}

/// Parse one spooled file and place it on the write volume.
async fn index_file(
    tenant_code: &str,
    message: &IngestMessage,
    volume_id: i32,
    provider: &dyn common::storage::StorageProvider,
    template: &common::template::PathTemplate,
) -> Result<IngestItem, AppError> {
    let bytes = tokio::fs::read(&message.file_path)
        .await
        .map_err(|e| AppError::StorageUnavailable(format!("spool read failed: {e}")))?;
    let file_size = bytes.len() as i64;

    let header = parse_header(&bytes[..])?;
    let storage_path = template.resolve(tenant_code, header.attributes(), Utc::now());

    let reader: BoxReader = Box::new(std::io::Cursor::new(bytes));
    provider.write(&storage_path, reader, file_size as u64).await?;

    Ok(IngestItem {
        header,
        volume_id,
        storage_path,
        file_size,
    })
}

/// Move a failed file to `error/{tenant}/{original-name}`.
async fn quarantine(state: &AppState, tenant_code: &str, file_path: &str) {
    let source = Path::new(file_path);
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    let dir = Path::new(&state.config.ingest.error_dir).join(tenant_code);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        error!(error = %e, "Failed to create quarantine directory");
        return;
    }
    let target = dir.join(name);
    if let Err(e) = tokio::fs::rename(source, &target).await {
        warn!(file = %file_path, error = %e, "Quarantine move failed");
    }
}
