//! QIDO-RS search endpoints.
//!
//! Study and series UIDs are not globally unique in field data, so every
//! lookup tolerates multiple rows and returns them all; the caller
//! navigated in from a worklist context where that is acceptable.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::database::tenant_txn;
use crate::entity::clinical::{instance, patient, series, study};
use crate::error::AppError;
use crate::handlers::dicom_json::{Record, stream_records};
use crate::locator;
use crate::state::AppState;
use crate::tenant::Tenant;
use crate::utils::query::{DateMatch, dicom_wildcards_to_like, parse_date_match};

const MAX_LIMIT: u64 = 1000;
const DEFAULT_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
pub struct StudyQuery {
    #[serde(alias = "PatientName", alias = "00100010")]
    pub patient_name: Option<String>,
    #[serde(alias = "PatientID", alias = "00100020")]
    pub patient_id: Option<String>,
    #[serde(alias = "StudyDate", alias = "00080020")]
    pub study_date: Option<String>,
    #[serde(alias = "AccessionNumber", alias = "00080050")]
    pub accession_number: Option<String>,
    #[serde(alias = "StudyDescription", alias = "00081030")]
    pub study_description: Option<String>,
    #[serde(alias = "StudyInstanceUID", alias = "0020000D")]
    pub study_uid: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// `GET /dicomweb/{tenant}/studies`
#[instrument(skip(state, query), fields(tenant = %tenant.code))]
pub async fn search_studies(
    tenant: Tenant,
    State(state): State<AppState>,
    Query(query): Query<StudyQuery>,
) -> Result<Response, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let txn = tenant_txn(&state.db, &tenant.code).await?;

    // Patient predicates run against the owning patient row; collect the
    // matching ids first so the study scan stays on one table.
    let mut patient_filter = Condition::all();
    let mut filter_on_patient = false;
    if let Some(name) = query.patient_name.as_deref().filter(|s| !s.is_empty()) {
        filter_on_patient = true;
        patient_filter = patient_filter.add(match dicom_wildcards_to_like(name) {
            Some(like) => patient::Column::Name.like(like),
            None => patient::Column::Name.eq(name),
        });
    }
    if let Some(pid) = query.patient_id.as_deref().filter(|s| !s.is_empty()) {
        filter_on_patient = true;
        patient_filter = patient_filter.add(match dicom_wildcards_to_like(pid) {
            Some(like) => patient::Column::PatientId.like(like),
            None => patient::Column::PatientId.eq(pid),
        });
    }

    let mut condition = Condition::all();
    if filter_on_patient {
        let patient_ids: Vec<i64> = patient::Entity::find()
            .filter(patient_filter)
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if patient_ids.is_empty() {
            txn.commit().await?;
            return Ok(stream_records(vec![]));
        }
        condition = condition.add(study::Column::PatientFk.is_in(patient_ids));
    }

    if let Some(date) = query.study_date.as_deref().filter(|s| !s.is_empty()) {
        let matched = parse_date_match(date)
            .ok_or_else(|| AppError::Validation(format!("Bad StudyDate match: {date}")))?;
        condition = condition.add(match matched {
            DateMatch::Exact(day) => Condition::all().add(study::Column::StudyDate.eq(day)),
            DateMatch::Range { from, to } => {
                let mut range = Condition::all();
                if let Some(from) = from {
                    range = range.add(study::Column::StudyDate.gte(from));
                }
                if let Some(to) = to {
                    range = range.add(study::Column::StudyDate.lte(to));
                }
                range
            }
        });
    }
    if let Some(accession) = query.accession_number.as_deref().filter(|s| !s.is_empty()) {
        condition = condition.add(match dicom_wildcards_to_like(accession) {
            Some(like) => study::Column::AccessionNumber.like(like),
            None => study::Column::AccessionNumber.eq(accession),
        });
    }
    if let Some(description) = query.study_description.as_deref().filter(|s| !s.is_empty()) {
        condition = condition.add(match dicom_wildcards_to_like(description) {
            Some(like) => study::Column::Description.like(like),
            None => study::Column::Description.eq(description),
        });
    }
    if let Some(uid) = query.study_uid.as_deref().filter(|s| !s.is_empty()) {
        condition = condition.add(study::Column::StudyUid.eq(uid));
    }

    let studies = study::Entity::find()
        .filter(condition)
        .order_by_desc(study::Column::CreatedAt)
        .offset(Some(offset))
        .limit(Some(limit))
        .all(&txn)
        .await?;

    // Resolve owning patients for the demographics columns.
    let patient_ids: Vec<i64> = studies.iter().map(|s| s.patient_fk).collect();
    let patients: std::collections::HashMap<i64, patient::Model> = patient::Entity::find()
        .filter(patient::Column::Id.is_in(patient_ids))
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    txn.commit().await?;

    touch_last_accessed(&state, &tenant.code, studies.iter().map(|s| s.id).collect());

    let records = studies
        .iter()
        .map(|row| {
            let owner = patients.get(&row.patient_fk);
            Record::new()
                .str("00080020", "DA", row.study_date.as_deref())
                .str("00080030", "TM", row.study_time.as_deref())
                .str("00080050", "SH", row.accession_number.as_deref())
                .pn("00080090", row.referring_physician.as_deref())
                .str("00081030", "LO", row.description.as_deref())
                .pn("00100010", owner.and_then(|p| p.name.as_deref()))
                .str("00100020", "LO", owner.map(|p| p.patient_id.as_str()))
                .str("00100030", "DA", owner.and_then(|p| p.birth_date.as_deref()))
                .str("00100040", "CS", owner.and_then(|p| p.sex.as_deref()))
                .str("0020000D", "UI", Some(&row.study_uid))
                .int("00201206", "IS", Some(row.num_series as i64))
                .int("00201208", "IS", Some(row.num_instances as i64))
                .build()
        })
        .collect();

    Ok(stream_records(records))
}

/// `GET /dicomweb/{tenant}/studies/{study}/series`
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn search_series(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, study_uid)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let summaries = locator::series_by_study(&state, &tenant.code, &study_uid).await?;
    let records = summaries
        .iter()
        .map(|row| {
            Record::new()
                .str("00080060", "CS", Some(&row.modality))
                .str("0008103E", "LO", row.description.as_deref())
                .str("0020000E", "UI", Some(&row.series_uid))
                .int("00200011", "IS", row.series_number.map(i64::from))
                .int("00201209", "IS", Some(row.num_instances as i64))
                .build()
        })
        .collect();
    Ok(stream_records(records))
}

/// `GET /dicomweb/{tenant}/studies/{study}/series/{series}/instances`
#[instrument(skip(state), fields(tenant = %tenant.code))]
pub async fn search_instances(
    tenant: Tenant,
    State(state): State<AppState>,
    Path((_tenant, study_uid, series_uid)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let txn = tenant_txn(&state.db, &tenant.code).await?;
    let study_ids: Vec<i64> = study::Entity::find()
        .filter(study::Column::StudyUid.eq(&study_uid))
        .all(&txn)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    if study_ids.is_empty() {
        return Err(AppError::NotFound(format!("study {study_uid}")));
    }
    let series_rows = series::Entity::find()
        .filter(series::Column::StudyFk.is_in(study_ids))
        .filter(series::Column::SeriesUid.eq(&series_uid))
        .all(&txn)
        .await?;
    if series_rows.is_empty() {
        return Err(AppError::NotFound(format!("series {series_uid}")));
    }

    let mut records = Vec::new();
    for series_row in series_rows {
        let created_date = series_row.created_at.date_naive();
        let instances = instance::Entity::find()
            .filter(instance::Column::SeriesFk.eq(series_row.id))
            .filter(instance::Column::CreatedDate.eq(created_date))
            .order_by_asc(instance::Column::InstanceNumber)
            .all(&txn)
            .await?;
        for inst in instances {
            records.push(
                Record::new()
                    .str("00080016", "UI", Some(&inst.sop_class_uid))
                    .str("00080018", "UI", Some(&inst.sop_instance_uid))
                    .int("00200013", "IS", inst.instance_number.map(i64::from))
                    .int("00280008", "IS", Some(inst.num_frames as i64))
                    .build(),
            );
        }
    }
    txn.commit().await?;
    Ok(stream_records(records))
}

/// Asynchronously stamp `last_accessed_at` on the studies a list query
/// returned; LAST_ACCESS_DAYS lifecycle rules read this.
fn touch_last_accessed(state: &AppState, tenant_code: &str, study_ids: Vec<i64>) {
    if study_ids.is_empty() {
        return;
    }
    let state = state.clone();
    let tenant_code = tenant_code.to_string();
    tokio::spawn(async move {
        let result: Result<(), AppError> = async {
            let txn = tenant_txn(&state.db, &tenant_code).await?;
            study::Entity::update_many()
                .col_expr(
                    study::Column::LastAccessedAt,
                    sea_orm::sea_query::Expr::current_timestamp().into(),
                )
                .filter(study::Column::Id.is_in(study_ids))
                .exec(&txn)
                .await?;
            txn.commit().await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(tenant = %tenant_code, error = ?e, "last_accessed_at touch failed");
        }
    });
}
