//! Reference data: patients, doctors, staff, medicines and the symptom/condition vocabularies.
//!
//! These tables are plain storage. The free functions take a `&Connection` so the reconcilers can
//! call them inside their own transactions; [`ReferenceStore`] wraps them for standalone use.

use crate::db::Database;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{
    Doctor, Medicine, NewDoctor, NewMedicine, NewPatient, NewStaff, Patient, Staff,
    VocabularyEntry,
};
use crate::repositories::shared::{
    date_column, date_to_sql, is_unique_violation, now_utc, timestamp_column, timestamp_to_sql,
};
use crate::validation::{
    optional_text, validate_price_minor, validate_quantity, validate_vocabulary_name,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// The two append-only controlled vocabularies attached to encounters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vocabulary {
    Symptom,
    Condition,
}

impl Vocabulary {
    fn table(&self) -> &'static str {
        match self {
            Vocabulary::Symptom => "symptoms",
            Vocabulary::Condition => "conditions",
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Vocabulary::Symptom => "symptom",
            Vocabulary::Condition => "condition",
        }
    }
}

const PATIENT_COLUMNS: &str = "id, first_name, last_name, date_of_birth, gender, phone_number, email, residential_address, created_at";
const DOCTOR_COLUMNS: &str = "id, doctor_code, first_name, last_name, specialization, department";
const STAFF_COLUMNS: &str = "id, staff_code, full_name, department, role";
const MEDICINE_COLUMNS: &str = "id, name, price_minor, stock_quantity, description";

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        date_of_birth: date_column(row, 3)?,
        gender: row.get(4)?,
        phone_number: row.get(5)?,
        email: row.get(6)?,
        residential_address: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
    })
}

fn doctor_from_row(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    Ok(Doctor {
        id: row.get(0)?,
        doctor_code: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        specialization: row.get(4)?,
        department: row.get(5)?,
    })
}

fn staff_from_row(row: &Row<'_>) -> rusqlite::Result<Staff> {
    Ok(Staff {
        id: row.get(0)?,
        staff_code: row.get(1)?,
        full_name: row.get(2)?,
        department: row.get(3)?,
        role: row.get(4)?,
    })
}

pub(crate) fn medicine_from_row(row: &Row<'_>) -> rusqlite::Result<Medicine> {
    Ok(Medicine {
        id: row.get(0)?,
        name: row.get(1)?,
        price_minor: row.get(2)?,
        stock_quantity: row.get(3)?,
        description: row.get(4)?,
    })
}

// ============================================================================
// CONNECTION-LEVEL QUERIES
// ============================================================================

pub(crate) fn patient_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Patient>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
            params![id],
            patient_from_row,
        )
        .optional()?)
}

pub(crate) fn require_patient(conn: &Connection, id: i64) -> ClinicResult<Patient> {
    patient_by_id(conn, id)?.ok_or_else(|| ClinicError::not_found("patient", id))
}

pub(crate) fn doctor_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Doctor>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE id = ?1"),
            params![id],
            doctor_from_row,
        )
        .optional()?)
}

pub(crate) fn doctor_by_code(conn: &Connection, code: &str) -> ClinicResult<Option<Doctor>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE doctor_code = ?1"),
            params![code],
            doctor_from_row,
        )
        .optional()?)
}

/// First doctor whose "first last" name contains `fragment`.
pub(crate) fn doctor_by_name_fragment(
    conn: &Connection,
    fragment: &str,
) -> ClinicResult<Option<Doctor>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {DOCTOR_COLUMNS} FROM doctors
                 WHERE instr(first_name || ' ' || last_name, ?1) > 0
                 ORDER BY id LIMIT 1"
            ),
            params![fragment],
            doctor_from_row,
        )
        .optional()?)
}

pub(crate) fn doctor_codes(conn: &Connection) -> ClinicResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT doctor_code FROM doctors ORDER BY doctor_code")?;
    let codes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(codes)
}

pub(crate) fn staff_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Staff>> {
    Ok(conn
        .query_row(
            &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1"),
            params![id],
            staff_from_row,
        )
        .optional()?)
}

pub(crate) fn staff_by_code(conn: &Connection, code: &str) -> ClinicResult<Option<Staff>> {
    Ok(conn
        .query_row(
            &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE staff_code = ?1"),
            params![code],
            staff_from_row,
        )
        .optional()?)
}

pub(crate) fn medicine_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Medicine>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = ?1"),
            params![id],
            medicine_from_row,
        )
        .optional()?)
}

pub(crate) fn medicine_by_name(conn: &Connection, name: &str) -> ClinicResult<Option<Medicine>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MEDICINE_COLUMNS} FROM medicines WHERE name = ?1"),
            params![name],
            medicine_from_row,
        )
        .optional()?)
}

/// Returns the first id in `ids` that has no row in the vocabulary, if any.
pub(crate) fn first_missing_vocabulary_id(
    conn: &Connection,
    vocabulary: Vocabulary,
    ids: &[i64],
) -> ClinicResult<Option<i64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT 1 FROM {} WHERE id = ?1",
        vocabulary.table()
    ))?;
    for id in ids {
        if !stmt.exists(params![id])? {
            return Ok(Some(*id));
        }
    }
    Ok(None)
}

// ============================================================================
// REFERENCE STORE
// ============================================================================

/// Thin access to the reference tables.
#[derive(Clone, Debug)]
pub struct ReferenceStore {
    db: Database,
}

impl ReferenceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add_patient(&self, patient: NewPatient) -> ClinicResult<Patient> {
        let created_at = now_utc();
        let id = self.db.write(|tx| {
            tx.execute(
                "INSERT INTO patients (first_name, last_name, date_of_birth, gender, phone_number, email, residential_address, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    patient.first_name.as_str(),
                    patient.last_name.as_str(),
                    patient.date_of_birth.as_ref().map(date_to_sql),
                    optional_text(patient.gender.clone()),
                    optional_text(patient.phone_number.clone()),
                    optional_text(patient.email.clone()),
                    optional_text(patient.residential_address.clone()),
                    timestamp_to_sql(&created_at),
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        tracing::info!("registered patient {}", id);
        self.get_patient(id)
    }

    pub fn get_patient(&self, id: i64) -> ClinicResult<Patient> {
        self.db.read(|conn| require_patient(conn, id))
    }

    pub fn list_patients(&self) -> ClinicResult<Vec<Patient>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients ORDER BY last_name, first_name, id"
            ))?;
            let rows = stmt
                .query_map([], patient_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn add_doctor(&self, doctor: NewDoctor) -> ClinicResult<Doctor> {
        let id = self.db.write(|tx| {
            tx.execute(
                "INSERT INTO doctors (doctor_code, first_name, last_name, specialization, department)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    doctor.doctor_code.as_str(),
                    doctor.first_name.as_str(),
                    doctor.last_name.as_str(),
                    optional_text(doctor.specialization.clone()),
                    optional_text(doctor.department.clone()),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ClinicError::InvalidRequest(format!(
                        "doctor code already exists: {}",
                        doctor.doctor_code
                    ))
                } else {
                    e.into()
                }
            })?;
            Ok(tx.last_insert_rowid())
        })?;
        tracing::info!("added doctor {} ({})", doctor.doctor_code, id);
        self.get_doctor(id)
    }

    pub fn get_doctor(&self, id: i64) -> ClinicResult<Doctor> {
        self.db
            .read(|conn| doctor_by_id(conn, id))?
            .ok_or_else(|| ClinicError::not_found("doctor", id))
    }

    pub fn get_doctor_by_code(&self, code: &str) -> ClinicResult<Doctor> {
        self.db
            .read(|conn| doctor_by_code(conn, code))?
            .ok_or_else(|| ClinicError::not_found("doctor", code))
    }

    pub fn list_doctors(&self) -> ClinicResult<Vec<Doctor>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCTOR_COLUMNS} FROM doctors ORDER BY doctor_code"
            ))?;
            let rows = stmt
                .query_map([], doctor_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_doctor_codes(&self) -> ClinicResult<Vec<String>> {
        self.db.read(doctor_codes)
    }

    pub fn add_staff(&self, staff: NewStaff) -> ClinicResult<Staff> {
        let id = self.db.write(|tx| {
            tx.execute(
                "INSERT INTO staff (staff_code, full_name, department, role) VALUES (?1, ?2, ?3, ?4)",
                params![
                    staff.staff_code.as_str(),
                    staff.full_name.as_str(),
                    optional_text(staff.department.clone()),
                    staff.role.as_str(),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ClinicError::InvalidRequest(format!(
                        "staff code already exists: {}",
                        staff.staff_code
                    ))
                } else {
                    e.into()
                }
            })?;
            Ok(tx.last_insert_rowid())
        })?;
        tracing::info!("added staff {} ({})", staff.staff_code, id);
        self.db
            .read(|conn| staff_by_id(conn, id))?
            .ok_or_else(|| ClinicError::not_found("staff", id))
    }

    pub fn get_staff_by_code(&self, code: &str) -> ClinicResult<Staff> {
        self.db
            .read(|conn| staff_by_code(conn, code))?
            .ok_or_else(|| ClinicError::not_found("staff", code))
    }

    pub fn list_staff(&self) -> ClinicResult<Vec<Staff>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STAFF_COLUMNS} FROM staff ORDER BY staff_code"
            ))?;
            let rows = stmt
                .query_map([], staff_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Adds a vocabulary entry, returning the existing row when the exact name is already present.
    pub fn add_vocabulary_entry(
        &self,
        vocabulary: Vocabulary,
        name: &str,
    ) -> ClinicResult<VocabularyEntry> {
        let name = validate_vocabulary_name(name)?;
        let table = vocabulary.table();
        self.db.write(|tx| {
            tx.execute(
                &format!("INSERT INTO {table} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING"),
                params![name.as_str()],
            )?;
            let id: i64 = tx.query_row(
                &format!("SELECT id FROM {table} WHERE name = ?1"),
                params![name.as_str()],
                |row| row.get(0),
            )?;
            tracing::info!("{} '{}' available as {}", vocabulary.kind(), name, id);
            Ok(VocabularyEntry {
                id,
                name: name.into_inner(),
            })
        })
    }

    pub fn add_symptom(&self, name: &str) -> ClinicResult<VocabularyEntry> {
        self.add_vocabulary_entry(Vocabulary::Symptom, name)
    }

    pub fn add_condition(&self, name: &str) -> ClinicResult<VocabularyEntry> {
        self.add_vocabulary_entry(Vocabulary::Condition, name)
    }

    pub fn list_vocabulary(&self, vocabulary: Vocabulary) -> ClinicResult<Vec<VocabularyEntry>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, name FROM {} ORDER BY name",
                vocabulary.table()
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(VocabularyEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_symptoms(&self) -> ClinicResult<Vec<VocabularyEntry>> {
        self.list_vocabulary(Vocabulary::Symptom)
    }

    pub fn list_conditions(&self) -> ClinicResult<Vec<VocabularyEntry>> {
        self.list_vocabulary(Vocabulary::Condition)
    }

    pub fn add_medicine(&self, medicine: NewMedicine) -> ClinicResult<Medicine> {
        let price_minor = validate_price_minor(medicine.price_minor)?;
        let stock = validate_quantity(medicine.stock_quantity, true)?;
        let id = self.db.write(|tx| {
            tx.execute(
                "INSERT INTO medicines (name, price_minor, stock_quantity, description) VALUES (?1, ?2, ?3, ?4)",
                params![
                    medicine.name.as_str(),
                    price_minor,
                    stock,
                    optional_text(medicine.description.clone()),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ClinicError::InvalidRequest(format!(
                        "medicine already exists: {}",
                        medicine.name
                    ))
                } else {
                    e.into()
                }
            })?;
            Ok(tx.last_insert_rowid())
        })?;
        tracing::info!("added medicine {} ({})", medicine.name, id);
        self.get_medicine(id)
    }

    pub fn get_medicine(&self, id: i64) -> ClinicResult<Medicine> {
        self.db
            .read(|conn| medicine_by_id(conn, id))?
            .ok_or_else(|| ClinicError::not_found("medicine", id))
    }

    pub fn find_medicine_by_name(&self, name: &str) -> ClinicResult<Medicine> {
        self.db
            .read(|conn| medicine_by_name(conn, name.trim()))?
            .ok_or_else(|| ClinicError::not_found("medicine", name))
    }

    pub fn list_medicines(&self) -> ClinicResult<Vec<Medicine>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDICINE_COLUMNS} FROM medicines ORDER BY name"
            ))?;
            let rows = stmt
                .query_map([], medicine_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Adds `quantity` units to a medicine's stock in a single statement.
    pub fn restock_medicine(&self, id: i64, quantity: i64) -> ClinicResult<Medicine> {
        let quantity = validate_quantity(quantity, false)?;
        self.db.write(|tx| {
            let changed = tx.execute(
                "UPDATE medicines SET stock_quantity = stock_quantity + ?1 WHERE id = ?2",
                params![quantity, id],
            )?;
            if changed == 0 {
                return Err(ClinicError::not_found("medicine", id));
            }
            Ok(())
        })?;
        tracing::info!("restocked medicine {} by {}", id, quantity);
        self.get_medicine(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicdesk_types::NonEmptyText;

    fn store() -> ReferenceStore {
        ReferenceStore::new(Database::open_in_memory().unwrap())
    }

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    #[test]
    fn vocabulary_add_is_idempotent_and_case_sensitive() {
        let store = store();
        let first = store.add_symptom("Headache").unwrap();
        let again = store.add_symptom(" Headache ").unwrap();
        let lower = store.add_symptom("headache").unwrap();

        assert_eq!(first, again);
        assert_ne!(first.id, lower.id);
        assert_eq!(store.list_symptoms().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_doctor_code_is_rejected() {
        let store = store();
        let doctor = NewDoctor {
            doctor_code: text("DOC001"),
            first_name: text("Kofi"),
            last_name: text("Boateng"),
            specialization: Some("Paediatrics".into()),
            department: None,
        };
        store.add_doctor(doctor.clone()).unwrap();

        let err = store.add_doctor(doctor).unwrap_err();
        assert!(matches!(err, ClinicError::InvalidRequest(_)));
        assert_eq!(store.list_doctor_codes().unwrap(), vec!["DOC001"]);
    }

    #[test]
    fn restock_adds_to_existing_stock() {
        let store = store();
        let medicine = store
            .add_medicine(NewMedicine {
                name: text("Aspirin"),
                price_minor: 250,
                stock_quantity: 3,
                description: None,
            })
            .unwrap();

        let restocked = store.restock_medicine(medicine.id, 5).unwrap();
        assert_eq!(restocked.stock_quantity, 8);
        assert!(matches!(
            store.restock_medicine(999, 1),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn add_medicine_rejects_negative_price() {
        let err = store()
            .add_medicine(NewMedicine {
                name: text("Aspirin"),
                price_minor: -1,
                stock_quantity: 0,
                description: None,
            })
            .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidRequest(_)));
    }

    #[test]
    fn add_patient_round_trips_optional_fields() {
        let store = store();
        let patient = store
            .add_patient(NewPatient {
                first_name: text("Akosua"),
                last_name: text("Owusu"),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1990, 4, 2),
                gender: Some("  ".into()),
                phone_number: Some("0244000000".into()),
                email: None,
                residential_address: None,
            })
            .unwrap();

        assert_eq!(patient.full_name(), "Akosua Owusu");
        assert_eq!(patient.gender, None);
        assert_eq!(store.get_patient(patient.id).unwrap(), patient);
    }
}
