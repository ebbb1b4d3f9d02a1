pub mod cache;
pub mod config;
pub mod consumers;
pub mod database;
pub mod diskmon;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod locator;
pub mod metadata;
pub mod partitions;
pub mod repo;
pub mod routes;
pub mod state;
pub mod tenant;
pub mod utils;
pub mod volumes;

use crate::state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    routes::app_router(&state.config).with_state(state)
}
