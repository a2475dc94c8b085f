//! # API Shared
//!
//! Shared definitions for ClinicDesk APIs.
//!
//! Contains:
//! - Transport DTOs with OpenAPI schemas (`dto` module)
//! - Shared services like `HealthService`
//! - API-key authentication
//!
//! Used by `api-rest` and the `clinicdesk-run` binary.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{validate_api_key, AuthError, API_KEY_HEADER};
pub use health::{HealthRes, HealthService};
