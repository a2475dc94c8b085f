//! Transactional store.
//!
//! All cross-request coordination goes through this handle. Multi-row writes run inside
//! `BEGIN IMMEDIATE` transactions, so a check-then-insert sequence holds the write lock from the
//! check onwards, including against writers in other processes sharing the database file.

use crate::config::CoreConfig;
use crate::error::{ClinicError, ClinicResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS patients (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name          TEXT NOT NULL,
    last_name           TEXT NOT NULL,
    date_of_birth       TEXT,
    gender              TEXT,
    phone_number        TEXT,
    email               TEXT,
    residential_address TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS doctors (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    doctor_code    TEXT NOT NULL UNIQUE,
    first_name     TEXT NOT NULL,
    last_name      TEXT NOT NULL,
    specialization TEXT,
    department     TEXT
);

CREATE TABLE IF NOT EXISTS staff (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    staff_code TEXT NOT NULL UNIQUE,
    full_name  TEXT NOT NULL,
    department TEXT,
    role       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS symptoms (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS conditions (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS medicines (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL UNIQUE,
    price_minor    INTEGER NOT NULL CHECK (price_minor >= 0),
    stock_quantity INTEGER NOT NULL CHECK (stock_quantity >= 0),
    description    TEXT
);

CREATE TABLE IF NOT EXISTS encounters (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id             INTEGER NOT NULL REFERENCES patients(id),
    doctor_staff_id        INTEGER REFERENCES staff(id),
    attribution            TEXT NOT NULL CHECK (attribution IN ('linked', 'unlinked', 'unassigned')),
    attributed_doctor_code TEXT,
    diagnosis              TEXT NOT NULL,
    treatment_plan         TEXT,
    notes                  TEXT,
    follow_up_date         TEXT,
    status                 TEXT NOT NULL CHECK (status IN ('completed', 'pending', 'cancelled')),
    recorded_by            TEXT NOT NULL,
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS encounter_symptoms (
    encounter_id INTEGER NOT NULL REFERENCES encounters(id) ON DELETE CASCADE,
    symptom_id   INTEGER NOT NULL REFERENCES symptoms(id),
    PRIMARY KEY (encounter_id, symptom_id)
);

CREATE TABLE IF NOT EXISTS encounter_conditions (
    encounter_id INTEGER NOT NULL REFERENCES encounters(id) ON DELETE CASCADE,
    condition_id INTEGER NOT NULL REFERENCES conditions(id),
    PRIMARY KEY (encounter_id, condition_id)
);

CREATE TABLE IF NOT EXISTS bills (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_number TEXT NOT NULL UNIQUE,
    patient_id     INTEGER NOT NULL REFERENCES patients(id),
    patient_name   TEXT NOT NULL,
    doctor_name    TEXT NOT NULL,
    amount_minor   INTEGER NOT NULL CHECK (amount_minor >= 0),
    status         TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'overdue')),
    date           TEXT NOT NULL,
    created_by     TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS bills_one_outstanding_per_patient
    ON bills(patient_id) WHERE status IN ('pending', 'overdue');

CREATE TABLE IF NOT EXISTS prescriptions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id   INTEGER NOT NULL REFERENCES patients(id),
    encounter_id INTEGER REFERENCES encounters(id) ON DELETE SET NULL,
    medicine_id  INTEGER NOT NULL REFERENCES medicines(id),
    dosage       TEXT NOT NULL,
    instructions TEXT,
    illness      TEXT NOT NULL,
    doctor_name  TEXT NOT NULL,
    issued_by    TEXT NOT NULL,
    bill_id      INTEGER REFERENCES bills(id),
    created_at   TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS prescriptions_one_unbilled_per_illness
    ON prescriptions(patient_id, medicine_id, illness) WHERE bill_id IS NULL;

CREATE INDEX IF NOT EXISTS prescriptions_by_bill ON prescriptions(bill_id);

CREATE TABLE IF NOT EXISTS request_tokens (
    token       TEXT PRIMARY KEY,
    operation   TEXT NOT NULL,
    resource_id INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);
"#;

/// Shared handle to the SQLite store.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (and if needed creates) the database file named by the configuration.
    pub fn open(cfg: &CoreConfig) -> ClinicResult<Self> {
        let conn = Connection::open(cfg.database_path())?;
        conn.busy_timeout(cfg.busy_timeout())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(
            "opened {} (journal_mode={})",
            cfg.database_path().display(),
            mode
        );
        Self::initialise(conn)
    }

    /// Opens a private in-memory database with the full schema.
    pub fn open_in_memory() -> ClinicResult<Self> {
        Self::initialise(Connection::open_in_memory()?)
    }

    fn initialise(conn: Connection) -> ClinicResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> ClinicResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ClinicError::StoreUnavailable)
    }

    /// Runs a read-only closure against the connection.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> ClinicResult<T>,
    ) -> ClinicResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside an immediate transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error rolls back every row `f` wrote.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> ClinicResult<T>,
    ) -> ClinicResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                match tx.rollback() {
                    Ok(()) => tracing::debug!("rolled back transaction: {}", err.kind()),
                    Err(rollback) => tracing::error!(
                        "rollback after {} failed: {}",
                        err.kind(),
                        rollback
                    ),
                }
                Err(err)
            }
        }
    }
}
