//! Admin surface: volume registry CRUD + reload, lifecycle rules, manual
//! runs, task listings, patient correction and compression triggers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, Statement,
};
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::database::tenant_txn;
use crate::entity::clinical::{compression_task, file_correction_task, study};
use crate::entity::shared::{lifecycle_rule, migration_task, storage_volume};
use crate::entity::types::{
    LifecycleAction, LifecycleCondition, StorageTier, TaskStatus, VolumeKind, VolumeStatus,
};
use crate::error::AppError;
use crate::lifecycle;
use crate::state::AppState;
use crate::tenant::Tenant;
use crate::utils::ids::study_public_id;

// ---------------------------------------------------------------------------
// Volumes

#[derive(Deserialize)]
pub struct VolumeUpsertRequest {
    pub code: String,
    pub kind: VolumeKind,
    pub base_path: String,
    pub tier: StorageTier,
    pub status: VolumeStatus,
    pub priority: i32,
    pub path_template: Option<String>,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn redact(mut volume: storage_volume::Model) -> storage_volume::Model {
    volume.secret_key = volume.secret_key.map(|_| "********".into());
    volume
}

pub async fn list_volumes(
    State(state): State<AppState>,
) -> Result<Json<Vec<storage_volume::Model>>, AppError> {
    let rows = storage_volume::Entity::find()
        .order_by_asc(storage_volume::Column::Id)
        .all(&state.db)
        .await?;
    Ok(Json(rows.into_iter().map(redact).collect()))
}

#[instrument(skip(state, request))]
pub async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeUpsertRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(template) = &request.path_template {
        common::template::PathTemplate::compile(template)
            .map_err(|e| AppError::Validation(e.to_string()))?;
    }
    let model = storage_volume::ActiveModel {
        code: Set(request.code),
        kind: Set(request.kind),
        base_path: Set(request.base_path),
        tier: Set(request.tier),
        status: Set(request.status),
        priority: Set(request.priority),
        path_template: Set(request.path_template),
        bucket: Set(request.bucket),
        endpoint: Set(request.endpoint),
        region: Set(request.region),
        access_key: Set(request.access_key),
        secret_key: Set(request.secret_key),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let created = model.insert(&state.db).await?;
    state.volumes.reload().await.map_err(AppError::from)?;
    Ok((StatusCode::CREATED, Json(redact(created))))
}

#[instrument(skip(state, request))]
pub async fn update_volume(
    State(state): State<AppState>,
    Path(volume_id): Path<i32>,
    Json(request): Json<VolumeUpsertRequest>,
) -> Result<Json<storage_volume::Model>, AppError> {
    let existing = storage_volume::Entity::find_by_id(volume_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Volume not found".into()))?;
    if let Some(template) = &request.path_template {
        common::template::PathTemplate::compile(template)
            .map_err(|e| AppError::Validation(e.to_string()))?;
    }

    let update = storage_volume::ActiveModel {
        id: Set(existing.id),
        code: Set(request.code),
        kind: Set(request.kind),
        base_path: Set(request.base_path),
        tier: Set(request.tier),
        status: Set(request.status),
        priority: Set(request.priority),
        path_template: Set(request.path_template),
        bucket: Set(request.bucket),
        endpoint: Set(request.endpoint),
        region: Set(request.region),
        access_key: Set(request.access_key),
        secret_key: Set(request.secret_key),
        ..Default::default()
    };
    let updated = update.update(&state.db).await?;
    state.volumes.reload().await.map_err(AppError::from)?;
    Ok(Json(redact(updated)))
}

pub async fn delete_volume(
    State(state): State<AppState>,
    Path(volume_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let result = storage_volume::Entity::delete_by_id(volume_id)
        .exec(&state.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Volume not found".into()));
    }
    state.volumes.reload().await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reload_volumes(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.volumes.reload().await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Lifecycle rules

#[derive(Deserialize)]
pub struct RuleUpsertRequest {
    pub enabled: bool,
    pub action: LifecycleAction,
    pub source_tier: StorageTier,
    pub target_tier: Option<StorageTier>,
    pub condition: LifecycleCondition,
    pub condition_days: i32,
    #[serde(default)]
    pub delete_source: bool,
    pub compression_type: Option<String>,
    pub tenant_code: Option<String>,
}

fn validate_rule(request: &RuleUpsertRequest) -> Result<(), AppError> {
    match request.action {
        LifecycleAction::Migrate if request.target_tier.is_none() => Err(AppError::Validation(
            "MIGRATE rules require target_tier".into(),
        )),
        LifecycleAction::Compress if request.compression_type.is_none() => Err(
            AppError::Validation("COMPRESS rules require compression_type".into()),
        ),
        _ if request.condition_days < 0 => {
            Err(AppError::Validation("condition_days must be >= 0".into()))
        }
        _ => Ok(()),
    }
}

pub async fn list_rules(
    State(state): State<AppState>,
) -> Result<Json<Vec<lifecycle_rule::Model>>, AppError> {
    Ok(Json(
        lifecycle_rule::Entity::find()
            .order_by_asc(lifecycle_rule::Column::Id)
            .all(&state.db)
            .await?,
    ))
}

#[instrument(skip(state, request))]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<RuleUpsertRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_rule(&request)?;
    let model = lifecycle_rule::ActiveModel {
        enabled: Set(request.enabled),
        action: Set(request.action),
        source_tier: Set(request.source_tier),
        target_tier: Set(request.target_tier),
        condition: Set(request.condition),
        condition_days: Set(request.condition_days),
        delete_source: Set(request.delete_source),
        compression_type: Set(request.compression_type),
        tenant_code: Set(request.tenant_code),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let created = model.insert(&state.db).await?;
    lifecycle::evict_rule_caches(&state).await;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, request))]
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i32>,
    Json(request): Json<RuleUpsertRequest>,
) -> Result<Json<lifecycle_rule::Model>, AppError> {
    validate_rule(&request)?;
    lifecycle_rule::Entity::find_by_id(rule_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Rule not found".into()))?;

    let update = lifecycle_rule::ActiveModel {
        id: Set(rule_id),
        enabled: Set(request.enabled),
        action: Set(request.action),
        source_tier: Set(request.source_tier),
        target_tier: Set(request.target_tier),
        condition: Set(request.condition),
        condition_days: Set(request.condition_days),
        delete_source: Set(request.delete_source),
        compression_type: Set(request.compression_type),
        tenant_code: Set(request.tenant_code),
        ..Default::default()
    };
    let updated = update.update(&state.db).await?;
    lifecycle::evict_rule_caches(&state).await;
    Ok(Json(updated))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let result = lifecycle_rule::Entity::delete_by_id(rule_id)
        .exec(&state.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Rule not found".into()));
    }
    lifecycle::evict_rule_caches(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/admin/lifecycle/run` — trigger an evaluator pass now.
pub async fn run_lifecycle(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    tokio::spawn(async move {
        if let Err(e) = lifecycle::evaluator::run_evaluation(&state).await {
            error!(error = ?e, "Manual lifecycle evaluation failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

// ---------------------------------------------------------------------------
// Task listings

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<u64>,
}

pub async fn list_migration_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<migration_task::Model>>, AppError> {
    let mut select = migration_task::Entity::find();
    if let Some(status) = query.status {
        select = select.filter(migration_task::Column::Status.eq(status));
    }
    Ok(Json(
        select
            .order_by_desc(migration_task::Column::Id)
            .limit(Some(query.limit.unwrap_or(100).min(1000)))
            .all(&state.db)
            .await?,
    ))
}

pub async fn list_compression_tasks(
    tenant: Tenant,
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<compression_task::Model>>, AppError> {
    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let mut select = compression_task::Entity::find();
    if let Some(status) = query.status {
        select = select.filter(compression_task::Column::Status.eq(status));
    }
    let rows = select
        .order_by_desc(compression_task::Column::Id)
        .limit(Some(query.limit.unwrap_or(100).min(1000)))
        .all(&txn)
        .await?;
    txn.commit().await?;
    Ok(Json(rows))
}

pub async fn list_correction_tasks(
    tenant: Tenant,
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<file_correction_task::Model>>, AppError> {
    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let mut select = file_correction_task::Entity::find();
    if let Some(status) = query.status {
        select = select.filter(file_correction_task::Column::Status.eq(status));
    }
    let rows = select
        .order_by_desc(file_correction_task::Column::Id)
        .limit(Some(query.limit.unwrap_or(100).min(1000)))
        .all(&txn)
        .await?;
    txn.commit().await?;
    Ok(Json(rows))
}

#[derive(serde::Serialize)]
pub struct QueueDepthResponse {
    pub tenant: String,
    pub pending: i64,
}

pub async fn queue_depth(
    tenant: Tenant,
    State(state): State<AppState>,
) -> Result<Json<QueueDepthResponse>, AppError> {
    let pending = state.queue.pending_count(&tenant.code).await?;
    Ok(Json(QueueDepthResponse {
        tenant: tenant.code,
        pending,
    }))
}

// ---------------------------------------------------------------------------
// Patient correction

#[derive(Deserialize)]
pub struct PatientCorrectionRequest {
    pub patient_id: String,
    pub expected_version: i32,
}

/// Two-step state change: the patient row (including its `public_id`) is
/// rewritten synchronously under the optimistic lock; recomputing every
/// owning study's `public_id` runs as an asynchronous correction task.
#[instrument(skip(state, request), fields(tenant = %tenant.code))]
pub async fn correct_patient(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, patient_id)): Path<(String, i64)>,
    Json(request): Json<PatientCorrectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new_raw = request.patient_id.trim();
    if new_raw.is_empty() {
        return Err(AppError::Validation("patient_id must not be empty".into()));
    }
    let new_public_id = crate::utils::ids::patient_public_id(new_raw);

    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let result = txn
        .execute_raw(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"UPDATE patient SET
                   patient_id = $1,
                   public_id = $2,
                   is_provisional = false,
                   version = version + 1,
                   updated_at = now()
               WHERE id = $3 AND version = $4"#,
            vec![
                new_raw.to_string().into(),
                new_public_id.into(),
                patient_id.into(),
                request.expected_version.into(),
            ],
        ))
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Patient version mismatch or patient not found".into(),
        ));
    }

    let task = file_correction_task::ActiveModel {
        patient_fk: Set(patient_id),
        new_patient_id: Set(new_raw.to_string()),
        status: Set(TaskStatus::Pending),
        studies_updated: Set(0),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let task = task.insert(&txn).await?;

    txn.execute_raw(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "INSERT INTO audit_log (actor, action, target, details, created_at) \
         VALUES ($1, $2, $3, $4, now())",
        vec![
            "admin".to_string().into(),
            "PATIENT_CORRECTION".to_string().into(),
            patient_id.to_string().into(),
            serde_json::json!({ "new_patient_id": new_raw }).into(),
        ],
    ))
    .await?;
    txn.commit().await?;

    let task_id = task.id;
    let tenant_code = tenant.code.clone();
    let state2 = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_correction(&state2, &tenant_code, task_id).await {
            error!(tenant = %tenant_code, task = task_id, error = ?e, "Correction task failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Recompute `public_id` for every study owned by the corrected patient.
async fn run_correction(
    state: &AppState,
    tenant_code: &str,
    task_id: i64,
) -> Result<(), AppError> {
    let txn = tenant_txn(&state.db, tenant_code).await?;
    let task = file_correction_task::Entity::find_by_id(task_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("correction task vanished".into()))?;

    let mark = file_correction_task::ActiveModel {
        id: Set(task_id),
        status: Set(TaskStatus::InProgress),
        ..Default::default()
    };
    mark.update(&txn).await?;

    let studies = study::Entity::find()
        .filter(study::Column::PatientFk.eq(task.patient_fk))
        .all(&txn)
        .await?;
    let mut updated = 0i32;
    for row in &studies {
        let new_public = study_public_id(&task.new_patient_id, &row.study_uid);
        let update = study::ActiveModel {
            id: Set(row.id),
            public_id: Set(new_public),
            version: Set(row.version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        update.update(&txn).await?;
        updated += 1;
    }

    let done = file_correction_task::ActiveModel {
        id: Set(task_id),
        status: Set(TaskStatus::Completed),
        studies_updated: Set(updated),
        completed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    done.update(&txn).await?;
    txn.commit().await?;
    info!(tenant = %tenant_code, task = task_id, studies = updated, "Correction task completed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Compression trigger

#[derive(Deserialize)]
pub struct CompressionRequest {
    /// Target transfer syntax UID.
    pub compression_type: String,
}

/// `POST /api/v1/{tenant}/admin/studies/{uid}/compress`
#[instrument(skip(state, request), fields(tenant = %tenant.code))]
pub async fn trigger_compression(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, study_uid)): Path<(String, String)>,
    Json(request): Json<CompressionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let studies = study::Entity::find()
        .filter(study::Column::StudyUid.eq(&study_uid))
        .all(&txn)
        .await?;
    if studies.is_empty() {
        return Err(AppError::NotFound(format!("study {study_uid}")));
    }

    let mut created = 0usize;
    for row in &studies {
        let open = compression_task::Entity::find()
            .filter(compression_task::Column::StudyFk.eq(row.id))
            .filter(compression_task::Column::CompressionType.eq(&request.compression_type))
            .filter(
                compression_task::Column::Status
                    .is_in([TaskStatus::Pending, TaskStatus::InProgress]),
            )
            .one(&txn)
            .await?;
        if open.is_some() {
            continue;
        }
        let model = compression_task::ActiveModel {
            study_fk: Set(row.id),
            study_uid: Set(row.study_uid.clone()),
            compression_type: Set(request.compression_type.clone()),
            status: Set(TaskStatus::Pending),
            instances_converted: Set(0),
            instances_skipped: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        model.insert(&txn).await?;
        created += 1;
    }
    txn.commit().await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "tasks_created": created })),
    ))
}
