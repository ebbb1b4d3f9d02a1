use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionTrait,
};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    // Set connection pool options
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    // Only the shared scope is synced; tenant schemas are provisioned
    // externally.
    db.get_schema_registry("server::entity::shared::*")
        .sync(&db)
        .await?;

    Ok(db)
}

/// Tenant codes double as schema suffixes; anything outside this charset
/// is rejected before it can reach interpolated DDL.
pub fn valid_tenant_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn schema_name(tenant_code: &str) -> String {
    format!("tenant_{tenant_code}")
}

/// Open a transaction scoped to one tenant: unqualified table names
/// resolve to `tenant_{code}` first, then `public`. `SET LOCAL` dies with
/// the transaction, so pooled connections never leak a tenant scope.
///
/// The schema name is interpolated into DDL, so the charset check runs
/// here unconditionally — even codes read back from the externally
/// provisioned `tenant` table are not trusted.
pub async fn tenant_txn(
    db: &DatabaseConnection,
    tenant_code: &str,
) -> Result<DatabaseTransaction, DbErr> {
    if !valid_tenant_code(tenant_code) {
        return Err(DbErr::Custom(format!(
            "invalid tenant code '{tenant_code}'"
        )));
    }
    let txn = db.begin().await?;
    txn.execute_unprepared(&format!(
        "SET LOCAL search_path TO {}, public",
        schema_name(tenant_code)
    ))
    .await?;
    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_code_charset() {
        assert!(valid_tenant_code("h1"));
        assert!(valid_tenant_code("clinic_west_2"));
        assert!(!valid_tenant_code(""));
        assert!(!valid_tenant_code("H1"));
        assert!(!valid_tenant_code("h1;drop table"));
        assert!(!valid_tenant_code("h-1"));
        assert!(!valid_tenant_code("h1 "));
    }

    #[test]
    fn schema_name_is_prefixed() {
        assert_eq!(schema_name("h1"), "tenant_h1");
    }
}
