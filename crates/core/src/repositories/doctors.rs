//! Doctor resolution.
//!
//! Turns a loosely-typed doctor reference into a canonical doctor and, where one exists, the
//! staff row sharing its code. Encounters store the staff key, never the doctor key.
//!
//! Resolution order:
//! 1. an internal doctor key that identifies a doctor;
//! 2. otherwise a doctor code (a numeric key that matched nothing is retried as a code);
//! 3. a doctor without a staff row resolves with `staff = None` (not an error);
//! 4. no doctor at all fails with [`ClinicError::UnknownDoctor`] listing the valid codes.
//!
//! Inference from free-text notes is a separate best-effort lookup ([`infer_from_notes`]) used only
//! for display. Its result is labelled [`DoctorAttribution::Inferred`] and is never stored.

use crate::constants::{CONSULTING_DOCTOR_LABEL, DEFAULT_DEPARTMENT};
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{AttributionState, Doctor, DoctorAttribution, DoctorRef, Encounter, Staff};
use crate::repositories::reference::{
    doctor_by_code, doctor_by_id, doctor_by_name_fragment, doctor_codes, staff_by_code,
    staff_by_id,
};
use rusqlite::Connection;

/// Outcome of resolving a [`DoctorRef`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoctorResolution {
    pub doctor: Doctor,
    /// Staff row whose code matches the doctor's code, if the clinician has one.
    pub staff: Option<Staff>,
}

impl DoctorResolution {
    pub fn staff_id(&self) -> Option<i64> {
        self.staff.as_ref().map(|s| s.id)
    }

    pub fn state(&self) -> AttributionState {
        if self.staff.is_some() {
            AttributionState::Linked
        } else {
            AttributionState::Unlinked
        }
    }

    /// Display projection: staff name when linked, otherwise the doctor's own name.
    pub fn attribution(&self) -> DoctorAttribution {
        match &self.staff {
            Some(staff) => DoctorAttribution::Linked {
                staff_id: staff.id,
                display_name: staff.full_name.clone(),
                department: staff
                    .department
                    .clone()
                    .unwrap_or_else(|| self.doctor.department_or_default()),
            },
            None => DoctorAttribution::Unlinked {
                doctor_code: self.doctor.doctor_code.clone(),
                display_name: self.doctor.full_name(),
                department: self.doctor.department_or_default(),
            },
        }
    }
}

pub(crate) fn resolve_doctor_ref(
    conn: &Connection,
    doctor_ref: &DoctorRef,
) -> ClinicResult<DoctorResolution> {
    let doctor = match doctor_ref {
        DoctorRef::Key(key) => match doctor_by_id(conn, *key)? {
            Some(doctor) => Some(doctor),
            None => doctor_by_code(conn, &key.to_string())?,
        },
        DoctorRef::Code(code) => doctor_by_code(conn, code.trim())?,
    };

    let Some(doctor) = doctor else {
        return Err(ClinicError::UnknownDoctor {
            attempted: doctor_ref.to_string(),
            valid_codes: doctor_codes(conn)?,
        });
    };

    let staff = staff_by_code(conn, &doctor.doctor_code)?;
    match &staff {
        Some(staff) => tracing::debug!(
            "mapped doctor {} to staff id {}",
            doctor.doctor_code,
            staff.id
        ),
        None => tracing::warn!(
            "doctor {} has no matching staff record; attribution left unlinked",
            doctor.doctor_code
        ),
    }

    Ok(DoctorResolution { doctor, staff })
}

/// Extracts the value of the `Consulting Doctor:` line from free-text notes.
pub fn extract_consulting_doctor(notes: &str) -> Option<&str> {
    let start = notes.find(CONSULTING_DOCTOR_LABEL)? + CONSULTING_DOCTOR_LABEL.len();
    let rest = &notes[start..];
    let value = rest.split('\n').next().unwrap_or(rest).trim();
    (!value.is_empty()).then_some(value)
}

/// Best-effort doctor inference from encounter notes, for display only.
///
/// The extracted text is tried as a doctor code, then as an internal key, then as a fragment of
/// a doctor's full name. When nothing matches, the text itself becomes the display name.
pub fn infer_from_notes(conn: &Connection, notes: &str) -> ClinicResult<Option<DoctorAttribution>> {
    let Some(source_text) = extract_consulting_doctor(notes) else {
        return Ok(None);
    };

    let mut matched = doctor_by_code(conn, source_text)?;
    if matched.is_none() {
        if let Ok(key) = source_text.parse::<i64>() {
            matched = doctor_by_id(conn, key)?;
        }
    }
    if matched.is_none() {
        matched = doctor_by_name_fragment(conn, source_text)?;
    }

    let attribution = match matched {
        Some(doctor) => DoctorAttribution::Inferred {
            display_name: doctor.full_name(),
            department: doctor.department_or_default(),
            source_text: source_text.to_string(),
            matched_doctor_code: Some(doctor.doctor_code),
        },
        None => DoctorAttribution::Inferred {
            display_name: source_text.to_string(),
            department: DEFAULT_DEPARTMENT.to_string(),
            source_text: source_text.to_string(),
            matched_doctor_code: None,
        },
    };
    Ok(Some(attribution))
}

/// Builds the display attribution for a stored encounter.
pub(crate) fn attribution_for(
    conn: &Connection,
    encounter: &Encounter,
) -> ClinicResult<DoctorAttribution> {
    match (encounter.attribution, encounter.doctor_staff_id) {
        (AttributionState::Linked, Some(staff_id)) => {
            if let Some(staff) = staff_by_id(conn, staff_id)? {
                let department = match staff.department.clone() {
                    Some(department) => department,
                    None => doctor_by_code(conn, &staff.staff_code)?
                        .map(|d| d.department_or_default())
                        .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string()),
                };
                return Ok(DoctorAttribution::Linked {
                    staff_id,
                    display_name: staff.full_name,
                    department,
                });
            }
        }
        (AttributionState::Unlinked, _) => {
            if let Some(code) = encounter.attributed_doctor_code.as_deref() {
                let attribution = match doctor_by_code(conn, code)? {
                    Some(doctor) => DoctorAttribution::Unlinked {
                        doctor_code: doctor.doctor_code.clone(),
                        display_name: doctor.full_name(),
                        department: doctor.department_or_default(),
                    },
                    None => DoctorAttribution::Unlinked {
                        doctor_code: code.to_string(),
                        display_name: code.to_string(),
                        department: DEFAULT_DEPARTMENT.to_string(),
                    },
                };
                return Ok(attribution);
            }
        }
        _ => {}
    }

    match encounter.notes.as_deref() {
        Some(notes) => Ok(infer_from_notes(conn, notes)?.unwrap_or(DoctorAttribution::Unassigned)),
        None => Ok(DoctorAttribution::Unassigned),
    }
}

/// Read-only access to doctor resolution.
#[derive(Clone, Debug)]
pub struct DoctorDirectory {
    db: Database,
}

impl DoctorDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn resolve(&self, doctor_ref: &DoctorRef) -> ClinicResult<DoctorResolution> {
        self.db.read(|conn| resolve_doctor_ref(conn, doctor_ref))
    }

    pub fn infer_from_notes(&self, notes: &str) -> ClinicResult<Option<DoctorAttribution>> {
        self.db.read(|conn| infer_from_notes(conn, notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDoctor, NewStaff};
    use crate::repositories::reference::ReferenceStore;
    use clinicdesk_types::NonEmptyText;

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    fn setup() -> (Database, Doctor, Doctor, Staff) {
        let db = Database::open_in_memory().unwrap();
        let store = ReferenceStore::new(db.clone());
        let linked = store
            .add_doctor(NewDoctor {
                doctor_code: text("DOC001"),
                first_name: text("Kofi"),
                last_name: text("Boateng"),
                specialization: Some("Cardiology".into()),
                department: Some("Cardiology".into()),
            })
            .unwrap();
        let unlinked = store
            .add_doctor(NewDoctor {
                doctor_code: text("DOC002"),
                first_name: text("Esi"),
                last_name: text("Asante"),
                specialization: None,
                department: None,
            })
            .unwrap();
        let staff = store
            .add_staff(NewStaff {
                staff_code: text("DOC001"),
                full_name: text("Dr. Kofi Boateng"),
                department: None,
                role: text("Doctor"),
            })
            .unwrap();
        (db, linked, unlinked, staff)
    }

    #[test]
    fn resolves_code_to_matching_staff() {
        let (db, linked, _, staff) = setup();
        let resolution = DoctorDirectory::new(db)
            .resolve(&DoctorRef::Code("DOC001".into()))
            .unwrap();

        assert_eq!(resolution.doctor, linked);
        assert_eq!(resolution.staff_id(), Some(staff.id));
        assert_eq!(resolution.attribution().display_name(), "Dr. Kofi Boateng");
        assert_eq!(resolution.attribution().department(), "Cardiology");
    }

    #[test]
    fn resolves_internal_key() {
        let (db, _, unlinked, _) = setup();
        let resolution = DoctorDirectory::new(db)
            .resolve(&DoctorRef::Key(unlinked.id))
            .unwrap();
        assert_eq!(resolution.doctor.doctor_code, "DOC002");
    }

    #[test]
    fn doctor_without_staff_resolves_unlinked() {
        let (db, _, unlinked, _) = setup();
        let resolution = DoctorDirectory::new(db)
            .resolve(&DoctorRef::Code("DOC002".into()))
            .unwrap();

        assert_eq!(resolution.staff_id(), None);
        assert_eq!(resolution.state(), AttributionState::Unlinked);
        assert_eq!(resolution.attribution().display_name(), unlinked.full_name());
        assert_eq!(resolution.attribution().department(), DEFAULT_DEPARTMENT);
    }

    #[test]
    fn unknown_code_lists_valid_codes() {
        let (db, _, _, _) = setup();
        let err = DoctorDirectory::new(db)
            .resolve(&DoctorRef::Code("DOC999".into()))
            .unwrap_err();

        match err {
            ClinicError::UnknownDoctor {
                attempted,
                valid_codes,
            } => {
                assert_eq!(attempted, "DOC999");
                assert_eq!(valid_codes, vec!["DOC001", "DOC002"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extract_consulting_doctor_reads_to_end_of_line() {
        let notes = "BP normal.\nConsulting Doctor:  Esi Asante \nReview in 2 weeks";
        assert_eq!(extract_consulting_doctor(notes), Some("Esi Asante"));
        assert_eq!(extract_consulting_doctor("Consulting Doctor:   "), None);
        assert_eq!(extract_consulting_doctor("consulting doctor: X"), None);
    }

    #[test]
    fn inference_matches_code_then_name_then_falls_back_to_text() {
        let (db, _, _, _) = setup();
        let directory = DoctorDirectory::new(db);

        let by_code = directory
            .infer_from_notes("Consulting Doctor: DOC002")
            .unwrap()
            .unwrap();
        assert_eq!(by_code.display_name(), "Esi Asante");

        let by_name = directory
            .infer_from_notes("Consulting Doctor: Boateng")
            .unwrap()
            .unwrap();
        assert!(matches!(
            by_name,
            DoctorAttribution::Inferred { matched_doctor_code: Some(ref c), .. } if c == "DOC001"
        ));

        let fallback = directory
            .infer_from_notes("Consulting Doctor: Dr. Visiting Locum")
            .unwrap()
            .unwrap();
        assert_eq!(fallback.display_name(), "Dr. Visiting Locum");
        assert_eq!(fallback.department(), DEFAULT_DEPARTMENT);

        assert_eq!(directory.infer_from_notes("no label here").unwrap(), None);
    }
}
