use axum::Router;
use axum::routing::{get, post, put};

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn app_router(config: &AppConfig) -> Router<AppState> {
    Router::new()
        .nest("/api/v1", api_routes(config))
        .nest("/dicomweb/{tenant}", dicomweb_routes())
}

fn api_routes(config: &AppConfig) -> Router<AppState> {
    Router::new()
        .route(
            "/{tenant}/ingest",
            post(handlers::ingest::ingest_files)
                .layer(handlers::ingest::ingest_body_limit(config.ingest.max_body_bytes)),
        )
        .route("/transfer/commit", post(handlers::ingest::transfer_commit))
        .nest("/admin", global_admin_routes())
        .nest("/{tenant}/admin", tenant_admin_routes())
}

fn global_admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/volumes",
            get(handlers::admin::list_volumes).post(handlers::admin::create_volume),
        )
        .route("/volumes/reload", post(handlers::admin::reload_volumes))
        .route(
            "/volumes/{id}",
            put(handlers::admin::update_volume).delete(handlers::admin::delete_volume),
        )
        .route(
            "/lifecycle/rules",
            get(handlers::admin::list_rules).post(handlers::admin::create_rule),
        )
        .route(
            "/lifecycle/rules/{id}",
            put(handlers::admin::update_rule).delete(handlers::admin::delete_rule),
        )
        .route("/lifecycle/run", post(handlers::admin::run_lifecycle))
        .route("/tasks/migration", get(handlers::admin::list_migration_tasks))
}

fn tenant_admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/compression",
            get(handlers::admin::list_compression_tasks),
        )
        .route(
            "/tasks/correction",
            get(handlers::admin::list_correction_tasks),
        )
        .route(
            "/patients/{id}/correction",
            post(handlers::admin::correct_patient),
        )
        .route(
            "/studies/{uid}/compress",
            post(handlers::admin::trigger_compression),
        )
        .route("/queue", get(handlers::admin::queue_depth))
}

fn dicomweb_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/studies",
            get(handlers::qido::search_studies).post(handlers::stow::store_instances),
        )
        .route("/studies/{study_uid}", get(handlers::wado::retrieve_study))
        .route(
            "/studies/{study_uid}/series",
            get(handlers::qido::search_series),
        )
        .route(
            "/studies/{study_uid}/series/{series_uid}",
            get(handlers::wado::retrieve_series),
        )
        .route(
            "/studies/{study_uid}/series/{series_uid}/metadata",
            get(handlers::wado::series_metadata),
        )
        .route(
            "/studies/{study_uid}/series/{series_uid}/instances",
            get(handlers::qido::search_instances),
        )
        .route(
            "/studies/{study_uid}/series/{series_uid}/instances/{sop_uid}",
            get(handlers::wado::retrieve_instance),
        )
        .route(
            "/studies/{study_uid}/series/{series_uid}/instances/{sop_uid}/frames/{frame_list}",
            get(handlers::wado::retrieve_frames),
        )
}
