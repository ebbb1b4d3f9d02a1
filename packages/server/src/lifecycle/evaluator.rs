//! Nightly rule evaluation.
//!
//! MIGRATE rules emit one task per instance (capped per pass); COMPRESS
//! rules emit one task per study. Both dedup against existing tasks so a
//! re-run never double-queues work.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbBackend, Set, Statement,
};
use tracing::{info, warn};

use crate::database::tenant_txn;
use crate::entity::shared::{lifecycle_rule, migration_task};
use crate::entity::types::{LifecycleAction, LifecycleCondition, TaskStatus};
use crate::error::AppError;
use crate::lifecycle::cached_rules;
use crate::state::AppState;
use crate::tenant::active_tenants;

/// Per-rule, per-pass cap on migration task rows.
const MAX_TASKS_PER_PASS: usize = 10_000;

pub async fn run_evaluation(state: &AppState) -> Result<(), AppError> {
    info!("Lifecycle evaluation pass starting");
    for rule in cached_rules(state, LifecycleAction::Migrate).await? {
        if let Err(e) = evaluate_migrate_rule(state, &rule).await {
            warn!(rule = rule.id, error = ?e, "MIGRATE rule evaluation failed, skipping");
        }
    }
    for rule in cached_rules(state, LifecycleAction::Compress).await? {
        if let Err(e) = evaluate_compress_rule(state, &rule).await {
            warn!(rule = rule.id, error = ?e, "COMPRESS rule evaluation failed, skipping");
        }
    }
    Ok(())
}

fn age_predicate(condition: LifecycleCondition) -> &'static str {
    match condition {
        LifecycleCondition::StudyAgeDays => "st.created_at < now() - make_interval(days => $1)",
        LifecycleCondition::LastAccessDays => {
            "COALESCE(st.last_accessed_at, st.created_at) < now() - make_interval(days => $1)"
        }
    }
}

fn volume_id_list(ids: &[i32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn rule_tenants(state: &AppState, rule: &lifecycle_rule::Model) -> Result<Vec<String>, AppError> {
    match &rule.tenant_code {
        Some(code) => Ok(vec![code.clone()]),
        None => active_tenants(state).await,
    }
}

async fn evaluate_migrate_rule(
    state: &AppState,
    rule: &lifecycle_rule::Model,
) -> Result<(), AppError> {
    let target_tier = rule
        .target_tier
        .ok_or_else(|| AppError::Validation("MIGRATE rule without target tier".into()))?;

    // A rule whose target tier has no writable volume is skipped whole.
    let (target_volume, _) = match state.volumes.active_write_volume(target_tier).await {
        Ok(target) => target,
        Err(e) => {
            warn!(rule = rule.id, error = %e, "No write volume in target tier, skipping rule");
            return Ok(());
        }
    };
    let source_ids: Vec<i32> = state
        .volumes
        .volumes_in_tier(rule.source_tier)
        .await
        .iter()
        .map(|v| v.id)
        .collect();
    if source_ids.is_empty() {
        return Ok(());
    }

    let mut queued = 0usize;
    for tenant_code in rule_tenants(state, rule).await? {
        if queued >= MAX_TASKS_PER_PASS {
            break;
        }
        let txn = tenant_txn(&state.db, &tenant_code).await?;
        let sql = format!(
            r#"SELECT i.id, i.created_date, i.series_uid, i.volume_id
               FROM instance i
               JOIN series se ON se.id = i.series_fk
               JOIN study st ON st.id = se.study_fk
               WHERE i.volume_id IN ({volumes})
                 AND {age}
                 AND NOT EXISTS (
                     SELECT 1 FROM migration_task mt
                     WHERE mt.tenant_code = $2
                       AND mt.instance_id = i.id
                       AND mt.instance_created_date = i.created_date
                       AND mt.status IN ('PENDING', 'IN_PROGRESS', 'COMPLETED'))
               LIMIT $3"#,
            volumes = volume_id_list(&source_ids),
            age = age_predicate(rule.condition),
        );
        let rows = txn
            .query_all_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![
                    rule.condition_days.into(),
                    tenant_code.clone().into(),
                    ((MAX_TASKS_PER_PASS - queued) as i64).into(),
                ],
            ))
            .await?;
        txn.commit().await?;

        for row in rows {
            let task = migration_task::ActiveModel {
                rule_id: Set(Some(rule.id)),
                tenant_code: Set(tenant_code.clone()),
                instance_id: Set(row.try_get("", "id")?),
                instance_created_date: Set(row.try_get("", "created_date")?),
                series_uid: Set(row.try_get("", "series_uid")?),
                source_volume_id: Set(row.try_get("", "volume_id")?),
                target_volume_id: Set(target_volume.id),
                delete_source: Set(rule.delete_source),
                status: Set(TaskStatus::Pending),
                created_at: Set(Utc::now()),
                ..Default::default()
            };
            task.insert(&state.db).await?;
            queued += 1;
        }
    }

    if queued > 0 {
        info!(rule = rule.id, queued, "MIGRATE rule queued tasks");
    }
    Ok(())
}

async fn evaluate_compress_rule(
    state: &AppState,
    rule: &lifecycle_rule::Model,
) -> Result<(), AppError> {
    let compression_type = rule
        .compression_type
        .as_deref()
        .ok_or_else(|| AppError::Validation("COMPRESS rule without compression_type".into()))?;
    let source_ids: Vec<i32> = state
        .volumes
        .volumes_in_tier(rule.source_tier)
        .await
        .iter()
        .map(|v| v.id)
        .collect();
    if source_ids.is_empty() {
        return Ok(());
    }

    let mut queued = 0usize;
    for tenant_code in rule_tenants(state, rule).await? {
        let txn = tenant_txn(&state.db, &tenant_code).await?;
        // Only studies that still hold instances away from the target
        // syntax qualify (converted studies drop out on their own).
        // FAILED tasks also block requeueing: a study missing its codec
        // must not re-fail every pass; the admin trigger re-queues it.
        let sql = format!(
            r#"SELECT DISTINCT st.id, st.study_uid
               FROM study st
               JOIN series se ON se.study_fk = st.id
               JOIN instance i ON i.series_fk = se.id
                              AND i.created_date = se.created_at::date
               WHERE i.volume_id IN ({volumes})
                 AND i.transfer_syntax_uid <> $2
                 AND {age}
                 AND NOT EXISTS (
                     SELECT 1 FROM compression_task ct
                     WHERE ct.study_fk = st.id
                       AND ct.compression_type = $2
                       AND ct.status IN ('PENDING', 'IN_PROGRESS', 'FAILED'))
               LIMIT $3"#,
            volumes = volume_id_list(&source_ids),
            age = age_predicate(rule.condition),
        );
        let rows = txn
            .query_all_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![
                    rule.condition_days.into(),
                    compression_type.to_string().into(),
                    (MAX_TASKS_PER_PASS as i64).into(),
                ],
            ))
            .await?;

        for row in &rows {
            let task = crate::entity::clinical::compression_task::ActiveModel {
                rule_id: Set(Some(rule.id)),
                study_fk: Set(row.try_get("", "id")?),
                study_uid: Set(row.try_get("", "study_uid")?),
                compression_type: Set(compression_type.to_string()),
                status: Set(TaskStatus::Pending),
                instances_converted: Set(0),
                instances_skipped: Set(0),
                created_at: Set(Utc::now()),
                ..Default::default()
            };
            task.insert(&txn).await?;
            queued += 1;
        }
        txn.commit().await?;
    }

    if queued > 0 {
        info!(rule = rule.id, queued, "COMPRESS rule queued tasks");
    }
    Ok(())
}
