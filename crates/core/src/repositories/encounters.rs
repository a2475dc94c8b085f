//! Encounter (consultation) recording.
//!
//! An encounter row and its symptom/condition association rows are written in one transaction.
//! Association ids are validated as they are inserted, after the encounter row exists, so any
//! failure rolls the encounter row back with them and readers never observe a partial record.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{
    AttributionState, Diagnosis, Encounter, EncounterFilter, EncounterStatus, EncounterUpdate,
    EncounterView, NewEncounter,
};
use crate::repositories::doctors::{attribution_for, resolve_doctor_ref};
use crate::repositories::reference::{first_missing_vocabulary_id, require_patient, Vocabulary};
use crate::repositories::shared::{
    date_column, date_to_sql, now_utc, timestamp_column, timestamp_to_sql,
};
use crate::validation::{dedup_ids, optional_text};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

const ENCOUNTER_COLUMNS: &str = "id, patient_id, doctor_staff_id, attribution, attributed_doctor_code, diagnosis, treatment_plan, notes, follow_up_date, status, recorded_by, created_at, updated_at";

fn encounter_from_row(row: &Row<'_>) -> rusqlite::Result<Encounter> {
    let attribution: String = row.get(3)?;
    let status: String = row.get(9)?;
    Ok(Encounter {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_staff_id: row.get(2)?,
        attribution: AttributionState::from_stored(&attribution),
        attributed_doctor_code: row.get(4)?,
        diagnosis: Diagnosis::from_stored(row.get(5)?),
        treatment_plan: row.get(6)?,
        notes: row.get(7)?,
        follow_up_date: date_column(row, 8)?,
        status: EncounterStatus::from_str(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?,
        recorded_by: row.get(10)?,
        created_at: timestamp_column(row, 11)?,
        updated_at: timestamp_column(row, 12)?,
    })
}

fn encounter_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Encounter>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ENCOUNTER_COLUMNS} FROM encounters WHERE id = ?1"),
            params![id],
            encounter_from_row,
        )
        .optional()?)
}

pub(crate) fn encounter_exists_for_patient(
    conn: &Connection,
    encounter_id: i64,
    patient_id: i64,
) -> ClinicResult<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM encounters WHERE id = ?1 AND patient_id = ?2")?;
    Ok(stmt.exists(params![encounter_id, patient_id])?)
}

fn tag_names(conn: &Connection, sql: &str, encounter_id: i64) -> ClinicResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let names = stmt
        .query_map(params![encounter_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn load_view(conn: &Connection, encounter: Encounter) -> ClinicResult<EncounterView> {
    let patient_name = require_patient(conn, encounter.patient_id)?.full_name();
    let doctor = attribution_for(conn, &encounter)?;
    let symptoms = tag_names(
        conn,
        "SELECT s.name FROM encounter_symptoms es JOIN symptoms s ON es.symptom_id = s.id
         WHERE es.encounter_id = ?1 ORDER BY s.name",
        encounter.id,
    )?;
    let conditions = tag_names(
        conn,
        "SELECT c.name FROM encounter_conditions ec JOIN conditions c ON ec.condition_id = c.id
         WHERE ec.encounter_id = ?1 ORDER BY c.name",
        encounter.id,
    )?;

    Ok(EncounterView {
        encounter,
        patient_name,
        doctor,
        symptoms,
        conditions,
    })
}

fn insert_tags(
    conn: &Connection,
    vocabulary: Vocabulary,
    encounter_id: i64,
    ids: &[i64],
) -> ClinicResult<()> {
    let sql = match vocabulary {
        Vocabulary::Symptom => {
            "INSERT INTO encounter_symptoms (encounter_id, symptom_id) VALUES (?1, ?2)"
        }
        Vocabulary::Condition => {
            "INSERT INTO encounter_conditions (encounter_id, condition_id) VALUES (?1, ?2)"
        }
    };
    let mut stmt = conn.prepare_cached(sql)?;
    for id in ids {
        if let Some(missing) = first_missing_vocabulary_id(conn, vocabulary, &[*id])? {
            return Err(ClinicError::InvalidReference {
                kind: vocabulary.kind(),
                id: missing,
            });
        }
        stmt.execute(params![encounter_id, id])?;
    }
    Ok(())
}

/// Service for recording and amending encounters.
#[derive(Clone, Debug)]
pub struct EncounterService {
    db: Database,
}

impl EncounterService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records an encounter with its symptom and condition tags as one atomic unit.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::NotFound`] if the patient does not exist
    /// - [`ClinicError::UnknownDoctor`] if a doctor reference matches no doctor
    /// - [`ClinicError::InvalidReference`] naming the first symptom or condition id with no row
    ///
    /// On any error no encounter or association row is left behind.
    pub fn create_encounter(
        &self,
        actor: &Actor,
        new: NewEncounter,
    ) -> ClinicResult<EncounterView> {
        actor.validate()?;

        let symptom_ids = dedup_ids(&new.symptom_ids);
        let condition_ids = dedup_ids(&new.condition_ids);
        let now = timestamp_to_sql(&now_utc());

        let encounter_id = self.db.write(|tx| {
            require_patient(tx, new.patient_id)?;

            let resolution = new
                .doctor_ref
                .as_ref()
                .map(|doctor_ref| resolve_doctor_ref(tx, doctor_ref))
                .transpose()?;
            let (staff_id, state, doctor_code) = match &resolution {
                Some(r) => (r.staff_id(), r.state(), Some(r.doctor.doctor_code.clone())),
                None => (None, AttributionState::Unassigned, None),
            };

            tx.execute(
                "INSERT INTO encounters (patient_id, doctor_staff_id, attribution, attributed_doctor_code, diagnosis,
                 treatment_plan, notes, follow_up_date, status, recorded_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    new.patient_id,
                    staff_id,
                    state.as_str(),
                    doctor_code,
                    new.diagnosis.as_str(),
                    optional_text(new.treatment_plan.clone()),
                    optional_text(new.notes.clone()),
                    new.follow_up_date.as_ref().map(date_to_sql),
                    new.status.as_str(),
                    actor.attribution(),
                    now,
                ],
            )?;
            let encounter_id = tx.last_insert_rowid();

            insert_tags(tx, Vocabulary::Symptom, encounter_id, &symptom_ids)?;
            insert_tags(tx, Vocabulary::Condition, encounter_id, &condition_ids)?;

            Ok(encounter_id)
        })?;

        tracing::info!(
            "recorded encounter {} for patient {} ({} symptoms, {} conditions) by {}",
            encounter_id,
            new.patient_id,
            symptom_ids.len(),
            condition_ids.len(),
            actor.staff_code
        );

        self.get_encounter(encounter_id)
    }

    pub fn get_encounter(&self, encounter_id: i64) -> ClinicResult<EncounterView> {
        self.db.read(|conn| {
            let encounter = encounter_by_id(conn, encounter_id)?
                .ok_or_else(|| ClinicError::not_found("encounter", encounter_id))?;
            load_view(conn, encounter)
        })
    }

    /// Lists encounters newest first.
    pub fn list_encounters(&self, filter: &EncounterFilter) -> ClinicResult<Vec<EncounterView>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENCOUNTER_COLUMNS} FROM encounters
                 WHERE (?1 IS NULL OR patient_id = ?1) AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let encounters = stmt
                .query_map(
                    params![filter.patient_id, filter.status.map(|s| s.as_str())],
                    encounter_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            encounters
                .into_iter()
                .map(|encounter| load_view(conn, encounter))
                .collect()
        })
    }

    /// Applies only the fields present in `update`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::NotFound`] if the encounter does not exist
    /// - [`ClinicError::InvalidRequest`] if no field is supplied
    pub fn update_encounter(
        &self,
        actor: &Actor,
        encounter_id: i64,
        update: EncounterUpdate,
    ) -> ClinicResult<EncounterView> {
        actor.validate()?;

        self.db.write(|tx| {
            if encounter_by_id(tx, encounter_id)?.is_none() {
                return Err(ClinicError::not_found("encounter", encounter_id));
            }
            if update.is_empty() {
                return Err(ClinicError::InvalidRequest("no fields to update".into()));
            }

            let mut assignments: Vec<&str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(diagnosis) = &update.diagnosis {
                assignments.push("diagnosis = ?");
                values.push(Box::new(diagnosis.as_str().to_string()));
            }
            if let Some(plan) = &update.treatment_plan {
                assignments.push("treatment_plan = ?");
                values.push(Box::new(optional_text(Some(plan.clone()))));
            }
            if let Some(status) = update.status {
                assignments.push("status = ?");
                values.push(Box::new(status.as_str()));
            }
            if let Some(notes) = &update.notes {
                assignments.push("notes = ?");
                values.push(Box::new(optional_text(Some(notes.clone()))));
            }
            assignments.push("updated_at = ?");
            values.push(Box::new(timestamp_to_sql(&now_utc())));
            values.push(Box::new(encounter_id));

            let sql = format!(
                "UPDATE encounters SET {} WHERE id = ?",
                assignments.join(", ")
            );
            let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            tx.execute(&sql, refs.as_slice())?;
            Ok(())
        })?;

        tracing::info!("updated encounter {} by {}", encounter_id, actor.staff_code);
        self.get_encounter(encounter_id)
    }

    /// Removes an encounter and its association rows as one atomic unit.
    pub fn delete_encounter(&self, actor: &Actor, encounter_id: i64) -> ClinicResult<()> {
        actor.validate()?;

        self.db.write(|tx| {
            tx.execute(
                "DELETE FROM encounter_symptoms WHERE encounter_id = ?1",
                params![encounter_id],
            )?;
            tx.execute(
                "DELETE FROM encounter_conditions WHERE encounter_id = ?1",
                params![encounter_id],
            )?;
            let deleted = tx.execute("DELETE FROM encounters WHERE id = ?1", params![encounter_id])?;
            if deleted == 0 {
                return Err(ClinicError::not_found("encounter", encounter_id));
            }
            Ok(())
        })?;

        tracing::info!("deleted encounter {} by {}", encounter_id, actor.staff_code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DoctorAttribution, DoctorRef, NewDoctor, NewPatient, NewStaff};
    use crate::repositories::reference::ReferenceStore;
    use clinicdesk_types::NonEmptyText;

    struct Fixture {
        db: Database,
        service: EncounterService,
        actor: Actor,
        patient_id: i64,
        fever: i64,
        cough: i64,
        malaria: i64,
    }

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let store = ReferenceStore::new(db.clone());
        let patient = store
            .add_patient(NewPatient {
                first_name: text("Yaw"),
                last_name: text("Mensah"),
                date_of_birth: None,
                gender: None,
                phone_number: None,
                email: None,
                residential_address: None,
            })
            .unwrap();
        store
            .add_doctor(NewDoctor {
                doctor_code: text("DOC001"),
                first_name: text("Kofi"),
                last_name: text("Boateng"),
                specialization: None,
                department: Some("Internal Medicine".into()),
            })
            .unwrap();
        store
            .add_doctor(NewDoctor {
                doctor_code: text("DOC002"),
                first_name: text("Esi"),
                last_name: text("Asante"),
                specialization: None,
                department: None,
            })
            .unwrap();
        store
            .add_staff(NewStaff {
                staff_code: text("DOC001"),
                full_name: text("Dr. Kofi Boateng"),
                department: None,
                role: text("Doctor"),
            })
            .unwrap();
        let fever = store.add_symptom("Fever").unwrap().id;
        let cough = store.add_symptom("Cough").unwrap().id;
        let malaria = store.add_condition("Malaria").unwrap().id;

        Fixture {
            service: EncounterService::new(db.clone()),
            db,
            actor: Actor::new("STF010", "Abena Darko", "Nurse").unwrap(),
            patient_id: patient.id,
            fever,
            cough,
            malaria,
        }
    }

    fn new_encounter(f: &Fixture) -> NewEncounter {
        NewEncounter {
            patient_id: f.patient_id,
            doctor_ref: Some(DoctorRef::Code("DOC001".into())),
            diagnosis: Diagnosis::Stated(text("Uncomplicated malaria")),
            treatment_plan: Some("ACT for 3 days".into()),
            notes: None,
            follow_up_date: chrono::NaiveDate::from_ymd_opt(2026, 11, 1),
            symptom_ids: vec![f.fever, f.cough, f.fever],
            condition_ids: vec![f.malaria],
            status: EncounterStatus::Completed,
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.read(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn create_returns_projection_with_names() {
        let f = setup();
        let view = f.service.create_encounter(&f.actor, new_encounter(&f)).unwrap();

        assert_eq!(view.patient_name, "Yaw Mensah");
        assert_eq!(view.symptoms, vec!["Cough", "Fever"]);
        assert_eq!(view.conditions, vec!["Malaria"]);
        assert_eq!(view.doctor.display_name(), "Dr. Kofi Boateng");
        assert_eq!(view.doctor.department(), "Internal Medicine");
        assert_eq!(view.encounter.attribution, AttributionState::Linked);
        assert_eq!(view.encounter.recorded_by, "Abena Darko (STF010)");
    }

    #[test]
    fn invalid_symptom_rolls_back_encounter_row() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.symptom_ids = vec![f.fever, 9_999];

        let err = f.service.create_encounter(&f.actor, new).unwrap_err();

        assert!(matches!(
            err,
            ClinicError::InvalidReference { kind: "symptom", id: 9_999 }
        ));
        assert_eq!(count(&f.db, "encounters"), 0);
        assert_eq!(count(&f.db, "encounter_symptoms"), 0);
    }

    #[test]
    fn invalid_condition_rolls_back_symptom_rows() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.condition_ids = vec![777];

        let err = f.service.create_encounter(&f.actor, new).unwrap_err();

        assert!(matches!(
            err,
            ClinicError::InvalidReference { kind: "condition", id: 777 }
        ));
        assert_eq!(count(&f.db, "encounters"), 0);
        assert_eq!(count(&f.db, "encounter_symptoms"), 0);
    }

    #[test]
    fn missing_patient_is_not_found() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.patient_id = 404;

        let err = f.service.create_encounter(&f.actor, new).unwrap_err();
        assert!(matches!(err, ClinicError::NotFound { entity: "patient", .. }));
    }

    #[test]
    fn unknown_doctor_code_fails_without_writing() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.doctor_ref = Some(DoctorRef::Code("DOC404".into()));

        let err = f.service.create_encounter(&f.actor, new).unwrap_err();
        assert!(matches!(err, ClinicError::UnknownDoctor { .. }));
        assert_eq!(count(&f.db, "encounters"), 0);
    }

    #[test]
    fn doctor_without_staff_row_saves_with_unset_reference() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.doctor_ref = Some(DoctorRef::Code("DOC002".into()));

        let view = f.service.create_encounter(&f.actor, new).unwrap();

        assert_eq!(view.encounter.doctor_staff_id, None);
        assert_eq!(view.encounter.attribution, AttributionState::Unlinked);
        assert_eq!(view.doctor.display_name(), "Esi Asante");
        assert!(matches!(view.doctor, DoctorAttribution::Unlinked { .. }));
    }

    #[test]
    fn unassigned_encounter_infers_doctor_from_notes_for_display_only() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.doctor_ref = None;
        new.notes = Some("Seen at OPD\nConsulting Doctor: DOC002".into());

        let view = f.service.create_encounter(&f.actor, new).unwrap();

        assert!(matches!(view.doctor, DoctorAttribution::Inferred { .. }));
        assert_eq!(view.doctor.display_name(), "Esi Asante");
        assert_eq!(view.encounter.doctor_staff_id, None);
        assert_eq!(view.encounter.attribution, AttributionState::Unassigned);
        assert_eq!(view.encounter.attributed_doctor_code, None);
    }

    #[test]
    fn unspecified_diagnosis_is_stored_as_sentinel() {
        let f = setup();
        let mut new = new_encounter(&f);
        new.diagnosis = Diagnosis::Unspecified;

        let view = f.service.create_encounter(&f.actor, new).unwrap();
        assert_eq!(view.encounter.diagnosis, Diagnosis::Unspecified);
        assert_eq!(view.encounter.diagnosis.as_str(), "Not specified");
    }

    #[test]
    fn update_changes_only_supplied_fields() {
        let f = setup();
        let created = f.service.create_encounter(&f.actor, new_encounter(&f)).unwrap();

        let updated = f
            .service
            .update_encounter(
                &f.actor,
                created.encounter.id,
                EncounterUpdate {
                    status: Some(EncounterStatus::Pending),
                    notes: Some(" Awaiting lab results ".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.encounter.status, EncounterStatus::Pending);
        assert_eq!(updated.encounter.notes.as_deref(), Some("Awaiting lab results"));
        assert_eq!(updated.encounter.diagnosis, created.encounter.diagnosis);
        assert_eq!(updated.encounter.treatment_plan, created.encounter.treatment_plan);
        assert!(updated.encounter.updated_at >= created.encounter.updated_at);
    }

    #[test]
    fn empty_update_is_invalid_and_missing_encounter_is_not_found() {
        let f = setup();
        let created = f.service.create_encounter(&f.actor, new_encounter(&f)).unwrap();

        let err = f
            .service
            .update_encounter(&f.actor, created.encounter.id, EncounterUpdate::default())
            .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidRequest(_)));

        let err = f
            .service
            .update_encounter(
                &f.actor,
                9_999,
                EncounterUpdate {
                    status: Some(EncounterStatus::Cancelled),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ClinicError::NotFound { .. }));
    }

    #[test]
    fn delete_removes_encounter_and_tags() {
        let f = setup();
        let created = f.service.create_encounter(&f.actor, new_encounter(&f)).unwrap();

        f.service
            .delete_encounter(&f.actor, created.encounter.id)
            .unwrap();

        assert_eq!(count(&f.db, "encounters"), 0);
        assert_eq!(count(&f.db, "encounter_symptoms"), 0);
        assert_eq!(count(&f.db, "encounter_conditions"), 0);
        assert!(matches!(
            f.service.delete_encounter(&f.actor, created.encounter.id),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn list_filters_by_status_newest_first() {
        let f = setup();
        let first = f.service.create_encounter(&f.actor, new_encounter(&f)).unwrap();
        let mut pending = new_encounter(&f);
        pending.status = EncounterStatus::Pending;
        let second = f.service.create_encounter(&f.actor, pending).unwrap();

        let all = f.service.list_encounters(&EncounterFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|v| v.encounter.id).collect::<Vec<_>>(),
            vec![second.encounter.id, first.encounter.id]
        );

        let pending_only = f
            .service
            .list_encounters(&EncounterFilter {
                patient_id: Some(f.patient_id),
                status: Some(EncounterStatus::Pending),
            })
            .unwrap();
        assert_eq!(pending_only.len(), 1);
        assert_eq!(pending_only[0].encounter.id, second.encounter.id);
    }
}
