//! Tiered-storage lifecycle: a nightly rule evaluator produces task rows,
//! and dedicated workers drain them on a fixed cycle.

pub mod compress;
pub mod evaluator;
pub mod migrate;

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::cache::LIFECYCLE_RULES;
use crate::entity::shared::lifecycle_rule;
use crate::entity::types::LifecycleAction;
use crate::error::AppError;
use crate::state::AppState;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

/// Enabled rules for one action, via the 6 h cache.
pub async fn cached_rules(
    state: &AppState,
    action: LifecycleAction,
) -> Result<Vec<lifecycle_rule::Model>, AppError> {
    let key = match action {
        LifecycleAction::Migrate => "MIGRATE",
        LifecycleAction::Compress => "COMPRESS",
    };
    let db = state.db.clone();
    state
        .caches
        .get_with(&LIFECYCLE_RULES, key, || async move {
            Ok(lifecycle_rule::Entity::find()
                .filter(lifecycle_rule::Column::Action.eq(action))
                .filter(lifecycle_rule::Column::Enabled.eq(true))
                .all(&db)
                .await?)
        })
        .await
}

/// Called by the admin CRUD after any rule change.
pub async fn evict_rule_caches(state: &AppState) {
    state.caches.evict(&LIFECYCLE_RULES, "MIGRATE").await;
    state.caches.evict(&LIFECYCLE_RULES, "COMPRESS").await;
}

/// Spawn the evaluator and both workers on their intervals. The first
/// tick fires immediately on startup, which doubles as crash recovery
/// for IN_PROGRESS tasks left behind.
pub fn spawn_scheduler(state: AppState) -> Vec<JoinHandle<()>> {
    let evaluator_interval = Duration::from_secs(state.config.lifecycle.evaluator_interval_secs);
    let worker_interval = Duration::from_secs(state.config.lifecycle.worker_interval_secs);

    let evaluator = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(evaluator_interval);
            loop {
                interval.tick().await;
                if let Err(e) = evaluator::run_evaluation(&state).await {
                    error!(error = ?e, "Lifecycle evaluation failed");
                }
            }
        })
    };

    let migrator = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(worker_interval);
            loop {
                interval.tick().await;
                if let Err(e) = migrate::run_migration_cycle(&state).await {
                    error!(error = ?e, "Migration worker cycle failed");
                }
            }
        })
    };

    let compressor = tokio::spawn(async move {
        let mut interval = tokio::time::interval(worker_interval);
        loop {
            interval.tick().await;
            if let Err(e) = compress::run_compression_cycle(&state).await {
                error!(error = ?e, "Compression worker cycle failed");
            }
        }
    });

    vec![evaluator, migrator, compressor]
}
