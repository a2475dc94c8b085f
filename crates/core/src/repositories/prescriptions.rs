//! Prescription issue and cancellation against medicine stock.
//!
//! The duplicate check, the stock decrement and the insert run in one immediate transaction.
//! Stock is only ever changed by conditional single-statement updates, so it cannot go negative
//! even when several processes share the database file.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{IllnessLabel, Medicine, MedicineRef, NewPrescription, Prescription};
use crate::repositories::encounters::encounter_exists_for_patient;
use crate::repositories::reference::{medicine_by_id, medicine_by_name, require_patient};
use crate::repositories::shared::{
    is_unique_violation, now_utc, record_request_token, replayed_resource, timestamp_column,
    timestamp_to_sql, token_reused, TokenOperation,
};
use crate::validation::optional_text;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const PRESCRIPTION_COLUMNS: &str = "id, patient_id, encounter_id, medicine_id, dosage, instructions, illness, doctor_name, issued_by, bill_id, created_at";

fn prescription_from_row(row: &Row<'_>) -> rusqlite::Result<Prescription> {
    let illness: String = row.get(6)?;
    Ok(Prescription {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        encounter_id: row.get(2)?,
        medicine_id: row.get(3)?,
        dosage: row.get(4)?,
        instructions: row.get(5)?,
        illness: IllnessLabel::new(Some(&illness)),
        doctor_name: row.get(7)?,
        issued_by: row.get(8)?,
        bill_id: row.get(9)?,
        created_at: timestamp_column(row, 10)?,
    })
}

pub(crate) fn prescription_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Prescription>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = ?1"),
            params![id],
            prescription_from_row,
        )
        .optional()?)
}

fn resolve_medicine(conn: &Connection, medicine: &MedicineRef) -> ClinicResult<Medicine> {
    let found = match medicine {
        MedicineRef::Id(id) => medicine_by_id(conn, *id)?,
        MedicineRef::Name(name) => medicine_by_name(conn, name.trim())?,
    };
    found.ok_or_else(|| ClinicError::not_found("medicine", medicine))
}

/// Id of the patient's unbilled prescription of `medicine_id` for `illness`, if one exists.
fn unbilled_duplicate(
    conn: &Connection,
    patient_id: i64,
    medicine_id: i64,
    illness: &IllnessLabel,
) -> ClinicResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM prescriptions
             WHERE patient_id = ?1 AND medicine_id = ?2 AND illness = ?3 AND bill_id IS NULL",
            params![patient_id, medicine_id, illness.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

fn duplicate_error(
    patient_id: i64,
    medicine: &Medicine,
    illness: &IllnessLabel,
    existing_prescription_id: i64,
) -> ClinicError {
    ClinicError::DuplicatePrescription {
        patient_id,
        medicine: medicine.name.clone(),
        illness: illness.clone(),
        existing_prescription_id,
    }
}

/// Service for issuing and cancelling prescriptions.
#[derive(Clone, Debug)]
pub struct PrescriptionService {
    db: Database,
}

impl PrescriptionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issues one unit of a medicine to a patient.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::NotFound`] if the patient or medicine does not exist
    /// - [`ClinicError::InvalidReference`] if `encounter_id` is not an encounter of this patient
    /// - [`ClinicError::DuplicatePrescription`] if an unbilled prescription already covers the
    ///   same medicine and illness for this patient
    /// - [`ClinicError::OutOfStock`] if the medicine has no stock left
    ///
    /// A request token seen before for this operation returns the original prescription. A token
    /// whose prescription was cancelled, or that belongs to another patient, is `InvalidRequest`.
    pub fn issue_prescription(
        &self,
        actor: &Actor,
        new: NewPrescription,
    ) -> ClinicResult<Prescription> {
        actor.validate()?;
        let illness = IllnessLabel::new(new.illness.as_deref());

        let prescription_id = self.db.write(|tx| {
            if let Some(token) = &new.request_token {
                if let Some(existing) =
                    replayed_resource(tx, token, TokenOperation::IssuePrescription)?
                {
                    return match prescription_by_id(tx, existing)? {
                        Some(p) if p.patient_id == new.patient_id => Ok(existing),
                        Some(_) => Err(token_reused(token)),
                        None => Err(ClinicError::InvalidRequest(format!(
                            "request token {token} issued prescription {existing}, which has since been cancelled"
                        ))),
                    };
                }
            }

            require_patient(tx, new.patient_id)?;
            let medicine = resolve_medicine(tx, &new.medicine)?;

            if let Some(encounter_id) = new.encounter_id {
                if !encounter_exists_for_patient(tx, encounter_id, new.patient_id)? {
                    return Err(ClinicError::InvalidReference {
                        kind: "encounter",
                        id: encounter_id,
                    });
                }
            }

            if let Some(existing) = unbilled_duplicate(tx, new.patient_id, medicine.id, &illness)? {
                return Err(duplicate_error(new.patient_id, &medicine, &illness, existing));
            }

            let decremented = tx.execute(
                "UPDATE medicines SET stock_quantity = stock_quantity - 1
                 WHERE id = ?1 AND stock_quantity > 0",
                params![medicine.id],
            )?;
            if decremented == 0 {
                return Err(ClinicError::OutOfStock {
                    medicine_id: medicine.id,
                    medicine: medicine.name,
                });
            }

            let inserted = tx.execute(
                "INSERT INTO prescriptions (patient_id, encounter_id, medicine_id, dosage, instructions,
                 illness, doctor_name, issued_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.patient_id,
                    new.encounter_id,
                    medicine.id,
                    new.dosage.as_str(),
                    optional_text(new.instructions.clone()),
                    illness.as_str(),
                    new.doctor_name.as_str(),
                    actor.attribution(),
                    timestamp_to_sql(&now_utc()),
                ],
            );
            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    if let Some(existing) =
                        unbilled_duplicate(tx, new.patient_id, medicine.id, &illness)?
                    {
                        return Err(duplicate_error(new.patient_id, &medicine, &illness, existing));
                    }
                }
                return Err(err.into());
            }
            let prescription_id = tx.last_insert_rowid();

            if let Some(token) = &new.request_token {
                record_request_token(tx, token, TokenOperation::IssuePrescription, prescription_id)?;
            }

            tracing::info!(
                "issued prescription {} of {} ({}) to patient {} by {}",
                prescription_id,
                medicine.name,
                illness,
                new.patient_id,
                actor.staff_code
            );
            Ok(prescription_id)
        })?;

        self.get_prescription(prescription_id)
    }

    /// Cancels a prescription, returning its unit to stock.
    ///
    /// When the prescription is a line item of an unpaid bill, the bill amount is reduced by the
    /// medicine's price. Lines of a paid bill cannot be cancelled.
    pub fn cancel_prescription(
        &self,
        actor: &Actor,
        prescription_id: i64,
        request_token: Option<Uuid>,
    ) -> ClinicResult<()> {
        actor.validate()?;

        self.db.write(|tx| {
            if let Some(token) = &request_token {
                if let Some(cancelled) =
                    replayed_resource(tx, token, TokenOperation::CancelPrescription)?
                {
                    if cancelled != prescription_id {
                        return Err(token_reused(token));
                    }
                    return Ok(());
                }
            }

            let prescription = prescription_by_id(tx, prescription_id)?
                .ok_or_else(|| ClinicError::not_found("prescription", prescription_id))?;
            let medicine = medicine_by_id(tx, prescription.medicine_id)?
                .ok_or_else(|| ClinicError::not_found("medicine", prescription.medicine_id))?;

            if let Some(bill_id) = prescription.bill_id {
                let status: String = tx.query_row(
                    "SELECT status FROM bills WHERE id = ?1",
                    params![bill_id],
                    |row| row.get(0),
                )?;
                if status == "paid" {
                    return Err(ClinicError::InvalidRequest(format!(
                        "prescription {prescription_id} belongs to paid bill {bill_id}"
                    )));
                }
                tx.execute(
                    "UPDATE bills SET amount_minor = MAX(amount_minor - ?1, 0) WHERE id = ?2",
                    params![medicine.price_minor, bill_id],
                )?;
                tracing::debug!(
                    "reduced bill {} by {} for cancelled prescription {}",
                    bill_id,
                    medicine.price_minor,
                    prescription_id
                );
            }

            tx.execute(
                "UPDATE medicines SET stock_quantity = stock_quantity + 1 WHERE id = ?1",
                params![medicine.id],
            )?;
            tx.execute(
                "DELETE FROM prescriptions WHERE id = ?1",
                params![prescription_id],
            )?;

            if let Some(token) = &request_token {
                record_request_token(tx, token, TokenOperation::CancelPrescription, prescription_id)?;
            }

            tracing::info!(
                "cancelled prescription {} of {} by {}; stock restored",
                prescription_id,
                medicine.name,
                actor.staff_code
            );
            Ok(())
        })
    }

    pub fn get_prescription(&self, prescription_id: i64) -> ClinicResult<Prescription> {
        self.db
            .read(|conn| prescription_by_id(conn, prescription_id))?
            .ok_or_else(|| ClinicError::not_found("prescription", prescription_id))
    }

    /// Lists prescriptions newest first, optionally for one patient.
    pub fn list_prescriptions(&self, patient_id: Option<i64>) -> ClinicResult<Vec<Prescription>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions
                 WHERE (?1 IS NULL OR patient_id = ?1)
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(params![patient_id], prescription_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
