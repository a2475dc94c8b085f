//! Mapping of core and auth errors onto HTTP responses.

use api_shared::dto::ErrorRes;
use api_shared::AuthError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use clinicdesk_core::ClinicError;

#[derive(Debug)]
pub enum ApiError {
    Clinic(ClinicError),
    Auth(AuthError),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Clinic(err) => match err {
                ClinicError::NotFound { .. } => StatusCode::NOT_FOUND,
                ClinicError::InvalidReference { .. } | ClinicError::UnknownDoctor { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ClinicError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ClinicError::DuplicatePrescription { .. }
                | ClinicError::OutOfStock { .. }
                | ClinicError::AlreadyBilled { .. } => StatusCode::CONFLICT,
                ClinicError::TransactionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
                ClinicError::StoreUnavailable | ClinicError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Auth(AuthError::NotConfigured) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorRes {
        match self {
            ApiError::Clinic(err) => ErrorRes::from(err),
            ApiError::Auth(err) => ErrorRes::new("Unauthorised", err.to_string()),
            ApiError::Internal(_) => ErrorRes::new("Internal", "Internal error"),
        }
    }
}

impl From<ClinicError> for ApiError {
    fn from(err: ClinicError) -> Self {
        ApiError::Clinic(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {:?}", self);
        } else {
            tracing::debug!("request rejected ({}): {:?}", status, self);
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rule_failures_are_conflicts() {
        let err = ApiError::from(ClinicError::OutOfStock {
            medicine_id: 2,
            medicine: "Aspirin".into(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ClinicError::InvalidReference {
                kind: "symptom",
                id: 4
            })
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_and_auth_failures_map_to_their_statuses() {
        let err = ApiError::from(ClinicError::StoreUnavailable);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::from(AuthError::Invalid).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
