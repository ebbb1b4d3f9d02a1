//! Monthly partition maintenance for the per-tenant `instance` tables.
//!
//! Runs daily and pre-creates partitions up to N months ahead. DDL
//! failures are logged and tolerated: a partition that already exists or
//! a tenant schema mid-provisioning must not take the job down.

use chrono::{Datelike, Months, NaiveDate, Utc};
use sea_orm::ConnectionTrait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::database::schema_name;
use crate::error::AppError;
use crate::state::AppState;

const DAILY: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

pub fn spawn_partition_job(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DAILY);
        loop {
            interval.tick().await;
            if let Err(e) = ensure_partitions(&state).await {
                warn!(error = ?e, "Partition maintenance failed");
            }
        }
    })
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("valid month start")
}

/// `instance_y2026m08` style partition name.
fn partition_name(month: NaiveDate) -> String {
    format!("instance_y{:04}m{:02}", month.year(), month.month())
}

pub async fn ensure_partitions(state: &AppState) -> Result<(), AppError> {
    let tenants = crate::tenant::active_tenants(state).await?;
    let months_ahead = state.config.lifecycle.partition_months_ahead;
    let current = month_start(Utc::now().date_naive());

    let mut created = 0usize;
    for tenant_code in &tenants {
        // Schema names land in interpolated DDL; never trust a row from
        // the externally provisioned tenant table.
        if !crate::database::valid_tenant_code(tenant_code) {
            warn!(tenant = %tenant_code, "Skipping tenant with invalid code");
            continue;
        }
        let schema = schema_name(tenant_code);
        for offset in 0..=months_ahead {
            let from = current + Months::new(offset);
            let to = from + Months::new(1);
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {schema}.{name} PARTITION OF {schema}.instance \
                 FOR VALUES FROM ('{from}') TO ('{to}')",
                name = partition_name(from),
            );
            match state.db.execute_unprepared(&sql).await {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!(tenant = %tenant_code, partition = %partition_name(from), error = %e,
                        "Partition DDL failed");
                }
            }
        }
    }
    info!(tenants = tenants.len(), statements = created, "Partition maintenance pass done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names_are_monthly() {
        let month = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(partition_name(month), "instance_y2026m08");
    }

    #[test]
    fn month_start_truncates() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        assert_eq!(month_start(date), NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());
        assert_eq!(
            month_start(date) + Months::new(5),
            NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()
        );
    }
}
