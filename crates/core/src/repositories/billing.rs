//! Billing reconciliation.
//!
//! Groups a patient's prescriptions into invoices. Billing is keyed by patient id; names are
//! carried for display only. At most one outstanding (pending or overdue) bill exists per
//! patient: the check runs inside the same immediate transaction as the insert, and a partial
//! unique index backs it at the store level.

use crate::actor::Actor;
use crate::constants::{INVOICE_DIGITS, INVOICE_PREFIX, MAX_PAGE_LIMIT};
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{Bill, BillPage, BillStatus, BillableGroup, BillingLine, IllnessLabel};
use crate::repositories::reference::require_patient;
use crate::repositories::shared::{
    date_column, date_to_sql, is_unique_violation, now_utc, record_request_token,
    replayed_resource, timestamp_column, timestamp_to_sql, token_reused, TokenOperation,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

const BILL_COLUMNS: &str =
    "id, invoice_number, patient_id, patient_name, doctor_name, amount_minor, status, date, created_by, created_at";

fn bill_from_row(row: &Row<'_>) -> rusqlite::Result<Bill> {
    let status: String = row.get(6)?;
    Ok(Bill {
        id: row.get(0)?,
        invoice_number: row.get(1)?,
        patient_id: row.get(2)?,
        patient_name: row.get(3)?,
        doctor_name: row.get(4)?,
        amount_minor: row.get(5)?,
        status: BillStatus::from_str(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
        })?,
        date: date_column(row, 7)?
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(7, "date".into(), Type::Null))?,
        created_by: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
    })
}

fn bill_by_id(conn: &Connection, id: i64) -> ClinicResult<Option<Bill>> {
    Ok(conn
        .query_row(
            &format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = ?1"),
            params![id],
            bill_from_row,
        )
        .optional()?)
}

/// The patient's outstanding bill other than `except`, if any.
fn outstanding_bill(
    conn: &Connection,
    patient_id: i64,
    except: Option<i64>,
) -> ClinicResult<Option<Bill>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {BILL_COLUMNS} FROM bills
                 WHERE patient_id = ?1 AND status IN ('pending', 'overdue') AND (?2 IS NULL OR id <> ?2)
                 LIMIT 1"
            ),
            params![patient_id, except],
            bill_from_row,
        )
        .optional()?)
}

fn already_billed(bill: Bill) -> ClinicError {
    ClinicError::AlreadyBilled {
        patient_id: bill.patient_id,
        bill_id: bill.id,
        invoice_number: bill.invoice_number,
    }
}

/// A billing line plus the grouping columns it was read with.
struct BillingRow {
    patient_id: i64,
    patient_name: String,
    doctor_name: String,
    line: BillingLine,
}

fn billing_rows(
    conn: &Connection,
    patient_id: Option<i64>,
    include_billed: bool,
) -> ClinicResult<Vec<BillingRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT p.id, p.patient_id, pt.first_name || ' ' || pt.last_name, p.doctor_name,
                p.medicine_id, m.name, m.price_minor, p.dosage, p.instructions, p.illness,
                m.stock_quantity, p.bill_id
         FROM prescriptions p
         JOIN patients pt ON pt.id = p.patient_id
         JOIN medicines m ON m.id = p.medicine_id
         WHERE (?1 IS NULL OR p.patient_id = ?1)
           AND (?2 OR p.bill_id IS NULL)
           AND (?2 OR ?1 IS NOT NULL
                OR NOT EXISTS (SELECT 1 FROM bills b WHERE b.patient_id = p.patient_id))
         ORDER BY p.patient_id, p.created_at, p.id",
    )?;
    let rows = stmt
        .query_map(params![patient_id, include_billed], |row| {
            let illness: String = row.get(9)?;
            Ok(BillingRow {
                patient_id: row.get(1)?,
                patient_name: row.get(2)?,
                doctor_name: row.get(3)?,
                line: BillingLine {
                    prescription_id: row.get(0)?,
                    medicine_id: row.get(4)?,
                    medicine_name: row.get(5)?,
                    price_minor: row.get(6)?,
                    dosage: row.get(7)?,
                    instructions: row.get(8)?,
                    illness: IllnessLabel::new(Some(&illness)),
                    stock_quantity: row.get(10)?,
                    bill_id: row.get(11)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Folds rows ordered by patient into one group per patient.
fn group_rows(rows: Vec<BillingRow>) -> Vec<BillableGroup> {
    let mut groups: Vec<BillableGroup> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if group.patient_id == row.patient_id => {
                group.total_minor += row.line.price_minor;
                group.prescriptions.push(row.line);
            }
            _ => groups.push(BillableGroup {
                patient_id: row.patient_id,
                patient_name: row.patient_name,
                doctor_name: row.doctor_name,
                total_minor: row.line.price_minor,
                prescriptions: vec![row.line],
            }),
        }
    }
    groups
}

fn format_invoice_number(n: u64) -> String {
    format!("{INVOICE_PREFIX}{n:0width$}", width = INVOICE_DIGITS)
}

fn used_invoice_numbers(conn: &Connection) -> ClinicResult<BTreeSet<u64>> {
    let mut stmt = conn.prepare("SELECT invoice_number FROM bills")?;
    let numbers = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|n| n.strip_prefix(INVOICE_PREFIX)?.parse::<u64>().ok())
        .collect();
    Ok(numbers)
}

/// Smallest unused invoice number, or a timestamp-derived one if the sequence cannot be read.
fn next_invoice_number(conn: &Connection) -> String {
    match used_invoice_numbers(conn) {
        Ok(used) => {
            let next = (1..).find(|n| !used.contains(n)).unwrap_or(1);
            format_invoice_number(next)
        }
        Err(err) => {
            let fallback = (now_utc().timestamp().unsigned_abs()) % 10u64.pow(INVOICE_DIGITS as u32);
            tracing::warn!(
                "could not read invoice sequence ({}); using timestamp-derived number {}",
                err,
                fallback
            );
            format_invoice_number(fallback)
        }
    }
}

/// Service for turning prescriptions into bills.
#[derive(Clone, Debug)]
pub struct BillingService {
    db: Database,
}

impl BillingService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Lists prescriptions grouped per patient for billing.
    ///
    /// - no patient, `all == false`: unbilled lines of patients that have never been billed
    /// - a patient, `all == false`: that patient's unbilled lines
    /// - `all == true`: every line, billed or not (audit view)
    pub fn list_billable(
        &self,
        patient_id: Option<i64>,
        all: bool,
    ) -> ClinicResult<Vec<BillableGroup>> {
        let rows = self.db.read(|conn| billing_rows(conn, patient_id, all))?;
        Ok(group_rows(rows))
    }

    /// Creates a pending bill from the patient's unbilled prescriptions.
    ///
    /// The group is recomputed inside the transaction; the new bill's lines are the
    /// prescriptions it attaches.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::NotFound`] if the patient does not exist
    /// - [`ClinicError::AlreadyBilled`] if the patient has an outstanding bill
    /// - [`ClinicError::InvalidRequest`] if there is nothing to bill
    pub fn generate_bill(
        &self,
        actor: &Actor,
        patient_id: i64,
        request_token: Option<Uuid>,
    ) -> ClinicResult<Bill> {
        actor.validate()?;

        let bill_id = self.db.write(|tx| {
            if let Some(token) = &request_token {
                if let Some(existing) = replayed_resource(tx, token, TokenOperation::GenerateBill)? {
                    return match bill_by_id(tx, existing)? {
                        Some(bill) if bill.patient_id == patient_id => Ok(existing),
                        Some(_) => Err(token_reused(token)),
                        None => Err(ClinicError::not_found("bill", existing)),
                    };
                }
            }

            let patient = require_patient(tx, patient_id)?;
            if let Some(bill) = outstanding_bill(tx, patient_id, None)? {
                return Err(already_billed(bill));
            }

            let Some(group) = group_rows(billing_rows(tx, Some(patient_id), false)?).pop() else {
                return Err(ClinicError::InvalidRequest(format!(
                    "patient {patient_id} has no unbilled prescriptions"
                )));
            };

            let invoice_number = next_invoice_number(tx);
            let now = now_utc();
            let inserted = tx.execute(
                "INSERT INTO bills (invoice_number, patient_id, patient_name, doctor_name, amount_minor,
                 status, date, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    invoice_number,
                    patient_id,
                    patient.full_name(),
                    group.doctor_name,
                    group.total_minor,
                    BillStatus::Pending.as_str(),
                    date_to_sql(&now.date_naive()),
                    actor.attribution(),
                    timestamp_to_sql(&now),
                ],
            );
            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    if let Some(bill) = outstanding_bill(tx, patient_id, None)? {
                        return Err(already_billed(bill));
                    }
                }
                return Err(err.into());
            }
            let bill_id = tx.last_insert_rowid();

            let mut attach =
                tx.prepare_cached("UPDATE prescriptions SET bill_id = ?1 WHERE id = ?2")?;
            for line in &group.prescriptions {
                attach.execute(params![bill_id, line.prescription_id])?;
            }

            if let Some(token) = &request_token {
                record_request_token(tx, token, TokenOperation::GenerateBill, bill_id)?;
            }

            tracing::info!(
                "generated bill {} ({}) for patient {}: {} lines, {} minor units, by {}",
                invoice_number,
                bill_id,
                patient_id,
                group.prescriptions.len(),
                group.total_minor,
                actor.staff_code
            );
            Ok(bill_id)
        })?;

        self.get_bill(bill_id)
    }

    /// Sets a bill's status.
    ///
    /// Re-opening a paid bill fails with [`ClinicError::AlreadyBilled`] while the patient has
    /// another outstanding bill.
    pub fn update_bill_status(
        &self,
        actor: &Actor,
        bill_id: i64,
        status: BillStatus,
    ) -> ClinicResult<Bill> {
        actor.validate()?;

        self.db.write(|tx| {
            let bill =
                bill_by_id(tx, bill_id)?.ok_or_else(|| ClinicError::not_found("bill", bill_id))?;

            if status.is_outstanding() {
                if let Some(other) = outstanding_bill(tx, bill.patient_id, Some(bill_id))? {
                    return Err(already_billed(other));
                }
            }

            tx.execute(
                "UPDATE bills SET status = ?1 WHERE id = ?2",
                params![status.as_str(), bill_id],
            )?;
            tracing::info!(
                "bill {} status {} -> {} by {}",
                bill.invoice_number,
                bill.status.as_str(),
                status.as_str(),
                actor.staff_code
            );
            Ok(())
        })?;

        self.get_bill(bill_id)
    }

    pub fn get_bill(&self, bill_id: i64) -> ClinicResult<Bill> {
        self.db
            .read(|conn| bill_by_id(conn, bill_id))?
            .ok_or_else(|| ClinicError::not_found("bill", bill_id))
    }

    /// Lists bills newest first. `page` starts at 1.
    pub fn list_bills(&self, page: u32, limit: u32) -> ClinicResult<BillPage> {
        if page == 0 {
            return Err(ClinicError::InvalidRequest("page starts at 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ClinicError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        self.db.read(|conn| {
            let total_items: u32 =
                conn.query_row("SELECT COUNT(*) FROM bills", [], |row| row.get(0))?;
            let offset = i64::from(page - 1) * i64::from(limit);

            let mut stmt = conn.prepare(&format!(
                "SELECT {BILL_COLUMNS} FROM bills ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let bills = stmt
                .query_map(params![limit, offset], bill_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(BillPage {
                bills,
                current_page: page,
                total_pages: total_items.div_ceil(limit),
                total_items,
                items_per_page: limit,
            })
        })
    }

    /// Deletes a bill, returning its lines to the billable pool.
    pub fn delete_bill(&self, actor: &Actor, bill_id: i64) -> ClinicResult<()> {
        actor.validate()?;

        self.db.write(|tx| {
            let bill =
                bill_by_id(tx, bill_id)?.ok_or_else(|| ClinicError::not_found("bill", bill_id))?;

            let detached = tx
                .execute(
                    "UPDATE prescriptions SET bill_id = NULL WHERE bill_id = ?1",
                    params![bill_id],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ClinicError::InvalidRequest(format!(
                            "bill {} has lines that duplicate the patient's current unbilled prescriptions",
                            bill.invoice_number
                        ))
                    } else {
                        e.into()
                    }
                })?;
            tx.execute("DELETE FROM bills WHERE id = ?1", params![bill_id])?;

            tracing::info!(
                "deleted bill {} ({} lines detached) by {}",
                bill.invoice_number,
                detached,
                actor.staff_code
            );
            Ok(())
        })
    }
}
