//! Caller identity.
//!
//! Every mutating operation receives the authenticated staff member performing it. There is no
//! ambient "current doctor": the identity is supplied by the caller on each request and recorded
//! on the rows it creates.

use crate::error::{ClinicError, ClinicResult};
use clinicdesk_types::NonEmptyText;

/// The staff member on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// External staff code (for example `STF014`).
    pub staff_code: NonEmptyText,

    /// The full name of the staff member.
    pub name: NonEmptyText,

    /// The operational role (for example "Doctor", "Pharmacist", "Front desk").
    pub role: NonEmptyText,
}

impl Actor {
    pub fn new(
        staff_code: impl AsRef<str>,
        name: impl AsRef<str>,
        role: impl AsRef<str>,
    ) -> ClinicResult<Self> {
        let actor = Self {
            staff_code: NonEmptyText::new(staff_code)
                .map_err(|_| ClinicError::InvalidRequest("missing staff code".into()))?,
            name: NonEmptyText::new(name)
                .map_err(|_| ClinicError::InvalidRequest("missing staff name".into()))?,
            role: NonEmptyText::new(role)
                .map_err(|_| ClinicError::InvalidRequest("missing staff role".into()))?,
        };
        actor.validate()?;
        Ok(actor)
    }

    /// Validate that the identity is usable for attribution on stored rows.
    pub fn validate(&self) -> ClinicResult<()> {
        let code = self.staff_code.as_str();
        if code.chars().any(char::is_whitespace) {
            return Err(ClinicError::InvalidRequest(
                "staff code must not contain whitespace".into(),
            ));
        }
        if self.name.as_str().contains(['\n', '\r']) || self.role.as_str().contains(['\n', '\r'])
        {
            return Err(ClinicError::InvalidRequest(
                "staff name and role must be single-line".into(),
            ));
        }
        Ok(())
    }

    /// The value stored in `recorded_by` / `issued_by` / `created_by` columns.
    pub fn attribution(&self) -> String {
        format!("{} ({})", self.name, self.staff_code)
    }
}

#[cfg(test)]
mod actor_tests {
    use super::*;

    #[test]
    fn new_rejects_staff_code_with_whitespace() {
        let err = Actor::new("STF 01", "Ama Mensah", "Nurse").expect_err("expected failure");
        assert!(matches!(err, ClinicError::InvalidRequest(_)));
    }

    #[test]
    fn new_rejects_missing_name() {
        let err = Actor::new("STF01", "  ", "Nurse").expect_err("expected failure");
        assert!(matches!(err, ClinicError::InvalidRequest(msg) if msg.contains("name")));
    }

    #[test]
    fn attribution_combines_name_and_code() {
        let actor = Actor::new("STF01", "Ama Mensah", "Nurse").expect("valid actor");
        assert_eq!(actor.attribution(), "Ama Mensah (STF01)");
    }
}
