//! Migration worker: executes queued instance moves between volumes.
//!
//! Per task: IN_PROGRESS → copy → verify existence and size at the
//! target → repoint `instance.volume_id` → optional source delete →
//! series-complete metadata relocation → COMPLETED. Any failure marks
//! the task FAILED with its cause and the next task proceeds; the
//! instance is never left without a valid file at its recorded volume.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, Statement,
};
use tracing::{info, warn};

use crate::cache::{INSTANCE_LOCATIONS, SERIES_METADATA_LOOKUP};
use crate::database::tenant_txn;
use crate::entity::clinical::instance;
use crate::entity::shared::migration_task;
use crate::entity::types::TaskStatus;
use crate::error::AppError;
use crate::metadata::schedule_rebuild;
use crate::state::AppState;

/// Tasks pulled per cycle.
const BATCH: u64 = 100;

pub async fn run_migration_cycle(state: &AppState) -> Result<(), AppError> {
    let tasks = migration_task::Entity::find()
        .filter(migration_task::Column::Status.eq(TaskStatus::Pending))
        .order_by_asc(migration_task::Column::Id)
        .limit(Some(BATCH))
        .all(&state.db)
        .await?;
    if tasks.is_empty() {
        return Ok(());
    }
    info!(count = tasks.len(), "Migration worker cycle starting");

    for task in tasks {
        let task_id = task.id;
        match execute_task(state, &task).await {
            Ok(()) => {
                finish_task(state, task_id, TaskStatus::Completed, None).await?;
            }
            Err(e) => {
                warn!(task = task_id, error = ?e, "Migration task failed");
                finish_task(state, task_id, TaskStatus::Failed, Some(format!("{e:?}"))).await?;
            }
        }
    }
    Ok(())
}

async fn finish_task(
    state: &AppState,
    task_id: i64,
    status: TaskStatus,
    error_message: Option<String>,
) -> Result<(), AppError> {
    let update = migration_task::ActiveModel {
        id: Set(task_id),
        status: Set(status),
        error_message: Set(error_message),
        completed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    update.update(&state.db).await?;
    Ok(())
}

async fn execute_task(state: &AppState, task: &migration_task::Model) -> Result<(), AppError> {
    let mark = migration_task::ActiveModel {
        id: Set(task.id),
        status: Set(TaskStatus::InProgress),
        started_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    mark.update(&state.db).await?;

    // Locate the instance row inside its tenant.
    let txn = tenant_txn(&state.db, &task.tenant_code).await?;
    let inst = instance::Entity::find()
        .filter(instance::Column::Id.eq(task.instance_id))
        .filter(instance::Column::CreatedDate.eq(task.instance_created_date))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("instance {} vanished", task.instance_id)))?;
    txn.commit().await?;

    if inst.volume_id == task.target_volume_id {
        // A previous attempt already moved it; idempotent success.
        return Ok(());
    }

    let source = state.volumes.provider(task.source_volume_id).await?;
    let target = state.volumes.provider(task.target_volume_id).await?;

    target
        .copy_from(source.as_ref(), &inst.storage_path, &inst.storage_path)
        .await?;

    // Verify before repointing; the row must never reference a volume
    // that does not hold the bytes.
    if !target.exists(&inst.storage_path).await? {
        return Err(AppError::StorageUnavailable(
            "copied object missing at target".into(),
        ));
    }
    let copied_size = target.size(&inst.storage_path).await?;
    if copied_size != inst.file_size as u64 {
        return Err(AppError::StorageUnavailable(format!(
            "size mismatch at target: {copied_size} != {}",
            inst.file_size
        )));
    }

    let txn = tenant_txn(&state.db, &task.tenant_code).await?;
    txn.execute_raw(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "UPDATE instance SET volume_id = $1 WHERE id = $2 AND created_date = $3",
        vec![
            task.target_volume_id.into(),
            task.instance_id.into(),
            task.instance_created_date.into(),
        ],
    ))
    .await?;

    // Once the whole series resides on the target, relocate its metadata
    // cache there too.
    let stragglers = txn
        .query_one_raw(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT COUNT(*) AS remaining FROM instance \
             WHERE series_fk = $1 AND created_date = $2 AND volume_id <> $3",
            vec![
                inst.series_fk.into(),
                task.instance_created_date.into(),
                task.target_volume_id.into(),
            ],
        ))
        .await?
        .map(|row| row.try_get::<i64>("", "remaining"))
        .transpose()?
        .unwrap_or(0);
    txn.commit().await?;

    if task.delete_source {
        source.delete(&inst.storage_path).await?;
    }

    let series_key = format!("{}:{}", task.tenant_code, task.series_uid);
    state.caches.evict(&INSTANCE_LOCATIONS, &series_key).await;
    if stragglers == 0 {
        state.caches.evict(&SERIES_METADATA_LOOKUP, &series_key).await;
        schedule_rebuild(
            state.clone(),
            task.tenant_code.clone(),
            task.series_uid.clone(),
        );
    }

    Ok(())
}
