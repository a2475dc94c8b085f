//! Shared repository utilities.
//!
//! Column conversions, constraint detection and the request-token ledger used to make
//! caller retries idempotent.

use crate::error::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Operations that accept a caller-supplied request token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenOperation {
    IssuePrescription,
    CancelPrescription,
    GenerateBill,
}

impl TokenOperation {
    fn as_str(&self) -> &'static str {
        match self {
            TokenOperation::IssuePrescription => "issue_prescription",
            TokenOperation::CancelPrescription => "cancel_prescription",
            TokenOperation::GenerateBill => "generate_bill",
        }
    }
}

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn timestamp_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn date_to_sql(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Reads an RFC 3339 timestamp column.
pub(crate) fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

/// Reads an optional `YYYY-MM-DD` column.
pub(crate) fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// True when `err` is a UNIQUE or PRIMARY KEY constraint failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Looks up a previously recorded request token.
///
/// Returns the resource produced by the original request when the token was used for the same
/// operation, and fails when the token was spent on a different operation.
pub(crate) fn replayed_resource(
    conn: &Connection,
    token: &Uuid,
    operation: TokenOperation,
) -> ClinicResult<Option<i64>> {
    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT operation, resource_id FROM request_tokens WHERE token = ?1",
            params![token.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        None => Ok(None),
        Some((op, resource_id)) if op == operation.as_str() => {
            tracing::info!("replaying {} for request token {}", op, token);
            Ok(Some(resource_id))
        }
        Some((op, _)) => Err(ClinicError::InvalidRequest(format!(
            "request token {token} was already used for {op}"
        ))),
    }
}

/// Error for a token replayed against a different patient, prescription or bill.
pub(crate) fn token_reused(token: &Uuid) -> ClinicError {
    ClinicError::InvalidRequest(format!(
        "request token {token} was already used for another resource"
    ))
}

/// Records the outcome of a tokenised request inside the caller's transaction.
pub(crate) fn record_request_token(
    conn: &Connection,
    token: &Uuid,
    operation: TokenOperation,
    resource_id: i64,
) -> ClinicResult<()> {
    conn.execute(
        "INSERT INTO request_tokens (token, operation, resource_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            token.to_string(),
            operation.as_str(),
            resource_id,
            timestamp_to_sql(&now_utc())
        ],
    )?;
    Ok(())
}
