//! Staff identity carried on mutating requests.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use clinicdesk_core::{Actor, ClinicError};

pub const STAFF_CODE_HEADER: &str = "x-staff-code";
pub const STAFF_NAME_HEADER: &str = "x-staff-name";
pub const STAFF_ROLE_HEADER: &str = "x-staff-role";

const DEFAULT_ROLE: &str = "Staff";

/// The acting staff member, read from the `x-staff-*` headers.
pub struct StaffActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl<S> FromRequestParts<S> for StaffActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let code = header(parts, STAFF_CODE_HEADER).ok_or_else(|| {
            ClinicError::InvalidRequest(format!("missing {STAFF_CODE_HEADER} header"))
        })?;
        let name = header(parts, STAFF_NAME_HEADER).ok_or_else(|| {
            ClinicError::InvalidRequest(format!("missing {STAFF_NAME_HEADER} header"))
        })?;
        let role = header(parts, STAFF_ROLE_HEADER).unwrap_or(DEFAULT_ROLE);

        Ok(StaffActor(Actor::new(code, name, role)?))
    }
}
