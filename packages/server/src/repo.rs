//! Hierarchical bulk upsert: patient → study → series → instance, one
//! transaction per batch.
//!
//! The stages are explicit because the series stage must hand its
//! `created_at::date` down to the instance stage — that date is the
//! partition key, and using the current date instead would scatter a
//! series across partitions and break prune-to-one-partition reads.
//! Everything here is idempotent under redelivery: resending a file is a
//! no-op at the instance dedup stage.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, DatabaseTransaction, DbBackend, DbErr, Statement, Value};

use common::dicom::DicomHeader;

use crate::utils::ids::{patient_public_id, study_public_id};

/// One parsed-and-stored file ready for indexing.
pub struct IngestItem {
    pub header: DicomHeader,
    pub volume_id: i32,
    pub storage_path: String,
    pub file_size: i64,
}

/// A series touched by a committed batch; the consumer evicts caches and
/// schedules metadata rebuilds from these.
#[derive(Debug, Clone)]
pub struct AffectedSeries {
    pub series_id: i64,
    pub created_date: NaiveDate,
    pub series_uid: String,
    pub study_uid: String,
}

#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub inserted_instances: usize,
    pub affected_series: Vec<AffectedSeries>,
}

struct PatientGroup<'a> {
    raw_pid: &'a str,
    name: Option<&'a str>,
    birth_date: Option<&'a str>,
    sex: Option<&'a str>,
    provisional: bool,
}

struct StudyGroup<'a> {
    study_uid: &'a str,
    patient_key: String,
    description: Option<&'a str>,
    accession: Option<&'a str>,
    study_date: Option<&'a str>,
    study_time: Option<&'a str>,
    referring_physician: Option<&'a str>,
}

fn stmt(sql: &str, values: Vec<Value>) -> Statement {
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

/// Upsert a batch of ingest items inside the caller's tenant transaction.
pub async fn upsert_batch(
    txn: &DatabaseTransaction,
    items: &[IngestItem],
    actor: &str,
) -> Result<UpsertOutcome, DbErr> {
    if items.is_empty() {
        return Ok(UpsertOutcome::default());
    }

    // Stage 1: patients, grouped by SHA1(raw-pid).
    let mut patients: BTreeMap<String, PatientGroup> = BTreeMap::new();
    for item in items {
        let h = &item.header;
        let group = patients
            .entry(patient_public_id(&h.patient_id))
            .or_insert_with(|| PatientGroup {
                raw_pid: &h.patient_id,
                name: None,
                birth_date: None,
                sex: None,
                provisional: h.provisional_patient_id,
            });
        group.name = group.name.or(h.patient_name.as_deref());
        group.birth_date = group.birth_date.or(h.patient_birth_date.as_deref());
        group.sex = group.sex.or(h.patient_sex.as_deref());
    }

    let mut patient_ids: BTreeMap<String, i64> = BTreeMap::new();
    for (public_id, group) in &patients {
        let row = txn
            .query_one_raw(stmt(
                r#"INSERT INTO patient
                       (public_id, patient_id, name, birth_date, sex,
                        is_provisional, num_studies, version, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, 0, 0, now(), now())
                   ON CONFLICT (public_id) DO UPDATE SET
                       name = COALESCE(EXCLUDED.name, patient.name),
                       birth_date = COALESCE(EXCLUDED.birth_date, patient.birth_date),
                       sex = COALESCE(EXCLUDED.sex, patient.sex),
                       updated_at = now()
                   RETURNING id"#,
                vec![
                    public_id.clone().into(),
                    group.raw_pid.to_string().into(),
                    group.name.map(str::to_string).into(),
                    group.birth_date.map(str::to_string).into(),
                    group.sex.map(str::to_string).into(),
                    group.provisional.into(),
                ],
            ))
            .await?
            .ok_or_else(|| DbErr::Custom("patient upsert returned no row".into()))?;
        patient_ids.insert(public_id.clone(), row.try_get::<i64>("", "id")?);
    }

    // Stage 2: studies, grouped by SHA1(raw-pid || "|" || study-uid) so a
    // colliding study UID under another patient stays a distinct row.
    let mut studies: BTreeMap<String, StudyGroup> = BTreeMap::new();
    for item in items {
        let h = &item.header;
        let group = studies
            .entry(study_public_id(&h.patient_id, &h.study_uid))
            .or_insert_with(|| StudyGroup {
                study_uid: &h.study_uid,
                patient_key: patient_public_id(&h.patient_id),
                description: None,
                accession: None,
                study_date: None,
                study_time: None,
                referring_physician: None,
            });
        group.description = group.description.or(h.study_description.as_deref());
        group.accession = group.accession.or(h.accession_number.as_deref());
        group.study_date = group.study_date.or(h.study_date.as_deref());
        group.study_time = group.study_time.or(h.study_time.as_deref());
        group.referring_physician = group
            .referring_physician
            .or(h.referring_physician.as_deref());
    }

    let mut study_ids: BTreeMap<String, i64> = BTreeMap::new();
    for (public_id, group) in &studies {
        let patient_fk = patient_ids[&group.patient_key];
        let row = txn
            .query_one_raw(stmt(
                r#"INSERT INTO study
                       (public_id, study_uid, patient_fk, description, accession_number,
                        study_date, study_time, referring_physician,
                        num_series, num_instances, study_size, version,
                        created_at, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, 0, 0, now(), now())
                   ON CONFLICT (public_id) DO UPDATE SET
                       description = COALESCE(EXCLUDED.description, study.description),
                       accession_number = COALESCE(EXCLUDED.accession_number, study.accession_number),
                       study_date = COALESCE(EXCLUDED.study_date, study.study_date),
                       study_time = COALESCE(EXCLUDED.study_time, study.study_time),
                       referring_physician = COALESCE(EXCLUDED.referring_physician, study.referring_physician),
                       updated_at = now()
                   RETURNING id"#,
                vec![
                    public_id.clone().into(),
                    group.study_uid.to_string().into(),
                    patient_fk.into(),
                    group.description.map(str::to_string).into(),
                    group.accession.map(str::to_string).into(),
                    group.study_date.map(str::to_string).into(),
                    group.study_time.map(str::to_string).into(),
                    group.referring_physician.map(str::to_string).into(),
                ],
            ))
            .await?
            .ok_or_else(|| DbErr::Custom("study upsert returned no row".into()))?;
        study_ids.insert(public_id.clone(), row.try_get::<i64>("", "id")?);
    }

    // Stage 3: series. RETURNING yields id AND created_at::date — the
    // partition key every instance row in this group must carry.
    let mut series_keys: BTreeMap<(i64, &str), Vec<&IngestItem>> = BTreeMap::new();
    for item in items {
        let h = &item.header;
        let study_fk = study_ids[&study_public_id(&h.patient_id, &h.study_uid)];
        series_keys
            .entry((study_fk, h.series_uid.as_str()))
            .or_default()
            .push(item);
    }

    let mut outcome = UpsertOutcome::default();
    for ((study_fk, series_uid), group_items) in &series_keys {
        let first = &group_items[0].header;
        let row = txn
            .query_one_raw(stmt(
                r#"INSERT INTO series
                       (study_fk, series_uid, modality, series_number, description,
                        body_part, institution, station_name,
                        num_instances, series_size, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, now())
                   ON CONFLICT (study_fk, series_uid) DO UPDATE SET
                       modality = EXCLUDED.modality
                   RETURNING id, created_at::date AS created_date"#,
                vec![
                    (*study_fk).into(),
                    series_uid.to_string().into(),
                    first.modality.clone().into(),
                    first.series_number.into(),
                    first.series_description.clone().into(),
                    first.body_part.clone().into(),
                    first.institution.clone().into(),
                    first.station_name.clone().into(),
                ],
            ))
            .await?
            .ok_or_else(|| DbErr::Custom("series upsert returned no row".into()))?;
        let series_id = row.try_get::<i64>("", "id")?;
        let created_date = row.try_get::<NaiveDate>("", "created_date")?;

        // Stage 4: instance dedup + insert. The predicate on created_date
        // prunes to the single partition holding this series.
        let existing = txn
            .query_all_raw(stmt(
                "SELECT sop_instance_uid FROM instance \
                 WHERE series_fk = $1 AND created_date = $2",
                vec![series_id.into(), created_date.into()],
            ))
            .await?;
        let mut known: HashSet<String> = existing
            .iter()
            .map(|row| row.try_get::<String>("", "sop_instance_uid"))
            .collect::<Result<_, _>>()?;

        for item in group_items {
            let h = &item.header;
            if !known.insert(h.sop_uid.clone()) {
                // Resend: already indexed, nothing to do.
                continue;
            }
            txn.execute_raw(stmt(
                r#"INSERT INTO instance
                       (created_date, sop_instance_uid, sop_class_uid, instance_number,
                        transfer_syntax_uid, num_frames, file_size,
                        volume_id, storage_path, series_fk, series_uid, study_uid,
                        created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())"#,
                vec![
                    created_date.into(),
                    h.sop_uid.clone().into(),
                    h.sop_class_uid.clone().into(),
                    h.instance_number.into(),
                    h.transfer_syntax_uid.clone().into(),
                    (h.number_of_frames as i32).into(),
                    item.file_size.into(),
                    item.volume_id.into(),
                    item.storage_path.clone().into(),
                    series_id.into(),
                    h.series_uid.clone().into(),
                    h.study_uid.clone().into(),
                ],
            ))
            .await?;
            outcome.inserted_instances += 1;
        }

        // Stage 5a: series counters from the (pruned) instance aggregate.
        txn.execute_raw(stmt(
            r#"UPDATE series SET
                   num_instances = (SELECT COUNT(*)::int FROM instance
                                    WHERE series_fk = $1 AND created_date = $2),
                   series_size = (SELECT COALESCE(SUM(file_size), 0) FROM instance
                                  WHERE series_fk = $1 AND created_date = $2)
               WHERE id = $1"#,
            vec![series_id.into(), created_date.into()],
        ))
        .await?;

        outcome.affected_series.push(AffectedSeries {
            series_id,
            created_date,
            series_uid: series_uid.to_string(),
            study_uid: first.study_uid.clone(),
        });
    }

    // Stage 5b: study counters roll up from series aggregates so no
    // unpruned instance scan happens.
    for study_fk in study_ids.values() {
        txn.execute_raw(stmt(
            r#"UPDATE study SET
                   num_series = (SELECT COUNT(*)::int FROM series WHERE study_fk = study.id),
                   num_instances = (SELECT COALESCE(SUM(num_instances), 0)::int
                                    FROM series WHERE study_fk = study.id),
                   study_size = (SELECT COALESCE(SUM(series_size), 0)
                                 FROM series WHERE study_fk = study.id),
                   updated_at = now()
               WHERE id = $1"#,
            vec![(*study_fk).into()],
        ))
        .await?;
    }
    for patient_fk in patient_ids.values() {
        txn.execute_raw(stmt(
            "UPDATE patient SET num_studies = \
                 (SELECT COUNT(*)::int FROM study WHERE patient_fk = $1) \
             WHERE id = $1",
            vec![(*patient_fk).into()],
        ))
        .await?;
    }

    txn.execute_raw(stmt(
        "INSERT INTO audit_log (actor, action, target, details, created_at) \
         VALUES ($1, $2, $3, $4, now())",
        vec![
            actor.to_string().into(),
            "INGEST_BATCH".to_string().into(),
            format!("{} instances", outcome.inserted_instances).into(),
            serde_json::json!({
                "received": items.len(),
                "inserted": outcome.inserted_instances,
                "series": outcome.affected_series.len(),
            })
            .into(),
        ],
    ))
    .await?;

    Ok(outcome)
}
