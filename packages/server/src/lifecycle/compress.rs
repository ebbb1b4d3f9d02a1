//! Compression worker: converts a study's instances to a target transfer
//! syntax, one task per study, one spawned job per task.
//!
//! Each non-skip instance is read, transcoded to the target syntax, the
//! source deleted in place, and the result written at the same path.
//! Instances already at the target syntax are skipped, so an interrupted
//! task can simply be re-run. Conversion goes through
//! `common::dicom::recode`: the deflated explicit-VR syntax is handled
//! natively, and a pair that would need a pixel codec fails the task
//! with the missing capability as its cause, without touching the file.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, Statement,
};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::cache::{INSTANCE_LOCATIONS, SERIES_METADATA_LOOKUP};
use crate::database::tenant_txn;
use crate::entity::clinical::{compression_task, instance, series};
use crate::entity::types::TaskStatus;
use crate::error::AppError;
use crate::metadata::schedule_rebuild;
use crate::state::AppState;
use crate::tenant::active_tenants;

const TASKS_PER_TENANT_CYCLE: u64 = 10;

pub async fn run_compression_cycle(state: &AppState) -> Result<(), AppError> {
    for tenant_code in active_tenants(state).await? {
        let txn = tenant_txn(&state.db, &tenant_code).await?;
        let tasks = compression_task::Entity::find()
            .filter(compression_task::Column::Status.eq(TaskStatus::Pending))
            .order_by_asc(compression_task::Column::Id)
            .limit(Some(TASKS_PER_TENANT_CYCLE))
            .all(&txn)
            .await?;
        txn.commit().await?;

        for task in tasks {
            let state = state.clone();
            let tenant_code = tenant_code.clone();
            // One lightweight job per study.
            tokio::spawn(async move {
                let task_id = task.id;
                if let Err(e) = process_task(&state, &tenant_code, task).await {
                    warn!(tenant = %tenant_code, task = task_id, error = ?e,
                        "Compression task failed");
                    let _ = fail_task(&state, &tenant_code, task_id, format!("{e:?}")).await;
                }
            });
        }
    }
    Ok(())
}

async fn fail_task(
    state: &AppState,
    tenant_code: &str,
    task_id: i64,
    message: String,
) -> Result<(), AppError> {
    let txn = tenant_txn(&state.db, tenant_code).await?;
    let update = compression_task::ActiveModel {
        id: Set(task_id),
        status: Set(TaskStatus::Failed),
        error_message: Set(Some(message)),
        completed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    update.update(&txn).await?;
    txn.commit().await?;
    Ok(())
}

async fn process_task(
    state: &AppState,
    tenant_code: &str,
    task: compression_task::Model,
) -> Result<(), AppError> {
    let target_tsuid = task.compression_type.clone();

    let txn = tenant_txn(&state.db, tenant_code).await?;
    let mark = compression_task::ActiveModel {
        id: Set(task.id),
        status: Set(TaskStatus::InProgress),
        ..Default::default()
    };
    mark.update(&txn).await?;

    let series_rows = series::Entity::find()
        .filter(series::Column::StudyFk.eq(task.study_fk))
        .all(&txn)
        .await?;

    let mut instances = Vec::new();
    for series_row in &series_rows {
        let created_date = series_row.created_at.date_naive();
        let mut rows = instance::Entity::find()
            .filter(instance::Column::SeriesFk.eq(series_row.id))
            .filter(instance::Column::CreatedDate.eq(created_date))
            .order_by_asc(instance::Column::InstanceNumber)
            .all(&txn)
            .await?;
        instances.append(&mut rows);
    }
    txn.commit().await?;

    let mut converted = 0i32;
    let mut skipped = 0i32;
    for inst in &instances {
        if inst.transfer_syntax_uid == target_tsuid {
            skipped += 1;
            continue;
        }
        let new_size = convert_instance(state, tenant_code, inst, &target_tsuid).await?;
        converted += 1;
        info!(tenant = %tenant_code, sop = %inst.sop_instance_uid, new_size,
            "Instance recompressed");
    }

    // Roll the new sizes up and stamp the series conversion markers.
    let txn = tenant_txn(&state.db, tenant_code).await?;
    for series_row in &series_rows {
        let created_date = series_row.created_at.date_naive();
        txn.execute_raw(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"UPDATE series SET
                   series_size = (SELECT COALESCE(SUM(file_size), 0) FROM instance
                                  WHERE series_fk = $1 AND created_date = $2),
                   compress_tsuid = $3,
                   compress_time = now()
               WHERE id = $1"#,
            vec![
                series_row.id.into(),
                created_date.into(),
                target_tsuid.clone().into(),
            ],
        ))
        .await?;
    }
    txn.execute_raw(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"UPDATE study SET
               study_size = (SELECT COALESCE(SUM(series_size), 0)
                             FROM series WHERE study_fk = study.id),
               updated_at = now()
           WHERE id = $1"#,
        vec![task.study_fk.into()],
    ))
    .await?;

    let done = compression_task::ActiveModel {
        id: Set(task.id),
        status: Set(TaskStatus::Completed),
        instances_converted: Set(converted),
        instances_skipped: Set(skipped),
        completed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    done.update(&txn).await?;
    txn.commit().await?;

    for series_row in &series_rows {
        let series_key = format!("{tenant_code}:{}", series_row.series_uid);
        state.caches.evict(&INSTANCE_LOCATIONS, &series_key).await;
        state.caches.evict(&SERIES_METADATA_LOOKUP, &series_key).await;
        schedule_rebuild(
            state.clone(),
            tenant_code.to_string(),
            series_row.series_uid.clone(),
        );
    }

    info!(tenant = %tenant_code, task = task.id, converted, skipped,
        "Compression task completed");
    Ok(())
}

/// Rewrite one instance file at the target syntax, in place: the source
/// is removed and the result lands at the same path, then the row's
/// syntax and size are updated.
async fn convert_instance(
    state: &AppState,
    tenant_code: &str,
    inst: &instance::Model,
    target_tsuid: &str,
) -> Result<i64, AppError> {
    let provider = state.volumes.provider(inst.volume_id).await?;
    let mut reader = provider.read(&inst.storage_path).await?;
    let mut bytes = Vec::with_capacity(inst.file_size.max(0) as usize);
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

    let converted = common::dicom::recode(&bytes, target_tsuid)?;
    let new_size = converted.len() as i64;

    provider.delete(&inst.storage_path).await?;
    provider
        .write(
            &inst.storage_path,
            Box::new(std::io::Cursor::new(converted)),
            new_size as u64,
        )
        .await?;

    let txn = tenant_txn(&state.db, tenant_code).await?;
    txn.execute_raw(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "UPDATE instance SET transfer_syntax_uid = $1, file_size = $2 \
         WHERE id = $3 AND created_date = $4",
        vec![
            target_tsuid.to_string().into(),
            new_size.into(),
            inst.id.into(),
            inst.created_date.into(),
        ],
    ))
    .await?;
    txn.commit().await?;
    Ok(new_size)
}
