//! Per-request tenant resolution.
//!
//! The tenant code arrives in the `{tenant}` path segment or the
//! `X-Tenant-ID` header. It is validated against `[a-z0-9_]+` before any
//! SQL and checked against the active-tenant list (cached, 60 s TTL).
//! Every tenant-scoped operation takes the resolved descriptor explicitly.

use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::request::Parts;
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter};

use crate::cache::ACTIVE_TENANTS;
use crate::database::{tenant_txn, valid_tenant_code};
use crate::entity::shared::tenant;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct Tenant {
    pub code: String,
}

impl Tenant {
    /// Open a transaction whose search path resolves this tenant's tables.
    pub async fn txn(&self, state: &AppState) -> Result<DatabaseTransaction, AppError> {
        Ok(tenant_txn(&state.db, &self.code).await?)
    }
}

/// Active tenant codes, via the 60 s cache.
pub async fn active_tenants(state: &AppState) -> Result<Vec<String>, AppError> {
    let db = state.db.clone();
    state
        .caches
        .get_with(&ACTIVE_TENANTS, "all", || async move {
            let rows = tenant::Entity::find()
                .filter(tenant::Column::Active.eq(true))
                .all(&db)
                .await?;
            Ok(rows.into_iter().map(|t| t.code).collect::<Vec<_>>())
        })
        .await
}

/// Resolve and authorise a tenant code coming off the wire.
pub async fn resolve_tenant(state: &AppState, code: &str) -> Result<Tenant, AppError> {
    if !valid_tenant_code(code) {
        return Err(AppError::TenantNotFound(code.to_string()));
    }
    let known = active_tenants(state).await?;
    if !known.iter().any(|t| t == code) {
        return Err(AppError::TenantNotFound(code.to_string()));
    }
    Ok(Tenant {
        code: code.to_string(),
    })
}

impl FromRequestParts<AppState> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let from_path = match RawPathParams::from_request_parts(parts, state).await {
            Ok(params) => params
                .iter()
                .find(|(name, _)| *name == "tenant")
                .map(|(_, value)| value.to_string()),
            Err(_) => None,
        };
        let code = from_path.or_else(|| {
            parts
                .headers
                .get("x-tenant-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        let Some(code) = code else {
            return Err(AppError::TenantNotFound("<missing>".to_string()));
        };
        resolve_tenant(state, &code).await
    }
}
