//! Request handlers.
//!
//! Core services are synchronous (SQLite), so every call runs on the blocking pool.

use crate::error::ApiError;
use crate::extract::StaffActor;
use crate::AppState;
use api_shared::dto::{
    AddVocabularyReq, BillPageRes, BillRes, BillableGroupRes, CreateEncounterReq, DoctorRes,
    EncounterRes, ErrorRes, GenerateBillReq, IssuePrescriptionReq, MedicineRes, PrescriptionRes,
    UpdateBillStatusReq, UpdateEncounterReq, VocabularyEntryRes,
};
use api_shared::{HealthRes, HealthService};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use clinicdesk_core::models::{EncounterFilter, EncounterStatus};
use clinicdesk_core::ClinicResult;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: u32 = 10;

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ClinicResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EncounterQuery {
    pub patient_id: Option<i64>,
    /// `completed`, `pending` or `cancelled`.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PrescriptionQuery {
    pub patient_id: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BillableQuery {
    pub patient_id: Option<i64>,
    /// Include patients that already have bills, and billed lines.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BillsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RequestTokenQuery {
    pub request_token: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

// ============================================================================
// REFERENCE DATA
// ============================================================================

#[utoipa::path(
    get,
    path = "/doctors",
    responses((status = 200, description = "All doctors", body = [DoctorRes]))
)]
pub async fn list_doctors(State(state): State<AppState>) -> Result<Json<Vec<DoctorRes>>, ApiError> {
    let reference = state.services.reference.clone();
    let doctors = blocking(move || reference.list_doctors()).await?;
    Ok(Json(doctors.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/symptoms",
    responses((status = 200, description = "Symptom vocabulary", body = [VocabularyEntryRes]))
)]
pub async fn list_symptoms(
    State(state): State<AppState>,
) -> Result<Json<Vec<VocabularyEntryRes>>, ApiError> {
    let reference = state.services.reference.clone();
    let entries = blocking(move || reference.list_symptoms()).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/symptoms",
    request_body = AddVocabularyReq,
    responses(
        (status = 201, description = "Symptom available", body = VocabularyEntryRes),
        (status = 400, description = "Bad request", body = ErrorRes)
    )
)]
/// Adds a symptom; an existing exact name returns the existing entry.
pub async fn add_symptom(
    State(state): State<AppState>,
    Json(req): Json<AddVocabularyReq>,
) -> Result<(StatusCode, Json<VocabularyEntryRes>), ApiError> {
    let reference = state.services.reference.clone();
    let entry = blocking(move || reference.add_symptom(&req.name)).await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

#[utoipa::path(
    get,
    path = "/conditions",
    responses((status = 200, description = "Condition vocabulary", body = [VocabularyEntryRes]))
)]
pub async fn list_conditions(
    State(state): State<AppState>,
) -> Result<Json<Vec<VocabularyEntryRes>>, ApiError> {
    let reference = state.services.reference.clone();
    let entries = blocking(move || reference.list_conditions()).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/conditions",
    request_body = AddVocabularyReq,
    responses(
        (status = 201, description = "Condition available", body = VocabularyEntryRes),
        (status = 400, description = "Bad request", body = ErrorRes)
    )
)]
pub async fn add_condition(
    State(state): State<AppState>,
    Json(req): Json<AddVocabularyReq>,
) -> Result<(StatusCode, Json<VocabularyEntryRes>), ApiError> {
    let reference = state.services.reference.clone();
    let entry = blocking(move || reference.add_condition(&req.name)).await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

#[utoipa::path(
    get,
    path = "/medicines",
    responses((status = 200, description = "Medicines with current stock", body = [MedicineRes]))
)]
pub async fn list_medicines(
    State(state): State<AppState>,
) -> Result<Json<Vec<MedicineRes>>, ApiError> {
    let reference = state.services.reference.clone();
    let medicines = blocking(move || reference.list_medicines()).await?;
    Ok(Json(medicines.into_iter().map(Into::into).collect()))
}

// ============================================================================
// ENCOUNTERS
// ============================================================================

#[utoipa::path(
    post,
    path = "/encounters",
    request_body = CreateEncounterReq,
    responses(
        (status = 201, description = "Encounter recorded", body = EncounterRes),
        (status = 400, description = "Bad request", body = ErrorRes),
        (status = 404, description = "Patient not found", body = ErrorRes),
        (status = 422, description = "Unknown doctor, symptom or condition", body = ErrorRes)
    )
)]
/// Records an encounter with its symptoms and conditions as one atomic unit.
pub async fn create_encounter(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Json(req): Json<CreateEncounterReq>,
) -> Result<(StatusCode, Json<EncounterRes>), ApiError> {
    let encounters = state.services.encounters.clone();
    let view = blocking(move || encounters.create_encounter(&actor, req.try_into()?)).await?;
    Ok((StatusCode::CREATED, Json(view.into())))
}

#[utoipa::path(
    get,
    path = "/encounters",
    params(EncounterQuery),
    responses((status = 200, description = "Encounters, newest first", body = [EncounterRes]))
)]
pub async fn list_encounters(
    State(state): State<AppState>,
    Query(query): Query<EncounterQuery>,
) -> Result<Json<Vec<EncounterRes>>, ApiError> {
    let encounters = state.services.encounters.clone();
    let views = blocking(move || {
        let filter = EncounterFilter {
            patient_id: query.patient_id,
            status: query
                .status
                .as_deref()
                .map(str::parse::<EncounterStatus>)
                .transpose()?,
        };
        encounters.list_encounters(&filter)
    })
    .await?;
    Ok(Json(views.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/encounters/{id}",
    params(("id" = i64, Path, description = "Encounter id")),
    responses(
        (status = 200, description = "Encounter", body = EncounterRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn get_encounter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EncounterRes>, ApiError> {
    let encounters = state.services.encounters.clone();
    let view = blocking(move || encounters.get_encounter(id)).await?;
    Ok(Json(view.into()))
}

#[utoipa::path(
    patch,
    path = "/encounters/{id}",
    params(("id" = i64, Path, description = "Encounter id")),
    request_body = UpdateEncounterReq,
    responses(
        (status = 200, description = "Encounter updated", body = EncounterRes),
        (status = 400, description = "No fields to update", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn update_encounter(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEncounterReq>,
) -> Result<Json<EncounterRes>, ApiError> {
    let encounters = state.services.encounters.clone();
    let view = blocking(move || encounters.update_encounter(&actor, id, req.try_into()?)).await?;
    Ok(Json(view.into()))
}

#[utoipa::path(
    delete,
    path = "/encounters/{id}",
    params(("id" = i64, Path, description = "Encounter id")),
    responses(
        (status = 204, description = "Encounter deleted"),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn delete_encounter(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let encounters = state.services.encounters.clone();
    blocking(move || encounters.delete_encounter(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// PRESCRIPTIONS
// ============================================================================

#[utoipa::path(
    post,
    path = "/prescriptions",
    request_body = IssuePrescriptionReq,
    responses(
        (status = 201, description = "Prescription issued and stock decremented", body = PrescriptionRes),
        (status = 404, description = "Patient or medicine not found", body = ErrorRes),
        (status = 409, description = "Duplicate prescription or out of stock", body = ErrorRes)
    )
)]
pub async fn issue_prescription(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Json(req): Json<IssuePrescriptionReq>,
) -> Result<(StatusCode, Json<PrescriptionRes>), ApiError> {
    let prescriptions = state.services.prescriptions.clone();
    let issued =
        blocking(move || prescriptions.issue_prescription(&actor, req.try_into()?)).await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}

#[utoipa::path(
    get,
    path = "/prescriptions",
    params(PrescriptionQuery),
    responses((status = 200, description = "Prescriptions, newest first", body = [PrescriptionRes]))
)]
pub async fn list_prescriptions(
    State(state): State<AppState>,
    Query(query): Query<PrescriptionQuery>,
) -> Result<Json<Vec<PrescriptionRes>>, ApiError> {
    let prescriptions = state.services.prescriptions.clone();
    let rows = blocking(move || prescriptions.list_prescriptions(query.patient_id)).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/prescriptions/{id}",
    params(("id" = i64, Path, description = "Prescription id")),
    responses(
        (status = 200, description = "Prescription", body = PrescriptionRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn get_prescription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PrescriptionRes>, ApiError> {
    let prescriptions = state.services.prescriptions.clone();
    let prescription = blocking(move || prescriptions.get_prescription(id)).await?;
    Ok(Json(prescription.into()))
}

#[utoipa::path(
    delete,
    path = "/prescriptions/{id}",
    params(("id" = i64, Path, description = "Prescription id"), RequestTokenQuery),
    responses(
        (status = 204, description = "Prescription cancelled and stock restored"),
        (status = 400, description = "Prescription belongs to a paid bill", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn cancel_prescription(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path(id): Path<i64>,
    Query(query): Query<RequestTokenQuery>,
) -> Result<StatusCode, ApiError> {
    let prescriptions = state.services.prescriptions.clone();
    blocking(move || prescriptions.cancel_prescription(&actor, id, query.request_token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/prescriptions/billable",
    params(BillableQuery),
    responses((status = 200, description = "Prescriptions grouped per patient", body = [BillableGroupRes]))
)]
pub async fn list_billable(
    State(state): State<AppState>,
    Query(query): Query<BillableQuery>,
) -> Result<Json<Vec<BillableGroupRes>>, ApiError> {
    let billing = state.services.billing.clone();
    let groups = blocking(move || billing.list_billable(query.patient_id, query.all)).await?;
    Ok(Json(groups.into_iter().map(Into::into).collect()))
}

// ============================================================================
// BILLS
// ============================================================================

#[utoipa::path(
    post,
    path = "/bills",
    request_body = GenerateBillReq,
    responses(
        (status = 201, description = "Bill generated", body = BillRes),
        (status = 400, description = "Nothing to bill", body = ErrorRes),
        (status = 404, description = "Patient not found", body = ErrorRes),
        (status = 409, description = "Patient already has an outstanding bill", body = ErrorRes)
    )
)]
pub async fn generate_bill(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Json(req): Json<GenerateBillReq>,
) -> Result<(StatusCode, Json<BillRes>), ApiError> {
    let billing = state.services.billing.clone();
    let bill =
        blocking(move || billing.generate_bill(&actor, req.patient_id, req.request_token)).await?;
    Ok((StatusCode::CREATED, Json(bill.into())))
}

#[utoipa::path(
    get,
    path = "/bills",
    params(BillsQuery),
    responses(
        (status = 200, description = "Bills, newest first", body = BillPageRes),
        (status = 400, description = "Bad page or limit", body = ErrorRes)
    )
)]
pub async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
) -> Result<Json<BillPageRes>, ApiError> {
    let billing = state.services.billing.clone();
    let page = blocking(move || {
        billing.list_bills(
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
    })
    .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/bills/{id}",
    params(("id" = i64, Path, description = "Bill id")),
    responses(
        (status = 200, description = "Bill", body = BillRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn get_bill(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BillRes>, ApiError> {
    let billing = state.services.billing.clone();
    let bill = blocking(move || billing.get_bill(id)).await?;
    Ok(Json(bill.into()))
}

#[utoipa::path(
    put,
    path = "/bills/{id}/status",
    params(("id" = i64, Path, description = "Bill id")),
    request_body = UpdateBillStatusReq,
    responses(
        (status = 200, description = "Status updated", body = BillRes),
        (status = 400, description = "Unknown status", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes),
        (status = 409, description = "Another bill is outstanding", body = ErrorRes)
    )
)]
pub async fn update_bill_status(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBillStatusReq>,
) -> Result<Json<BillRes>, ApiError> {
    let billing = state.services.billing.clone();
    let bill =
        blocking(move || billing.update_bill_status(&actor, id, req.status.parse()?)).await?;
    Ok(Json(bill.into()))
}

#[utoipa::path(
    delete,
    path = "/bills/{id}",
    params(("id" = i64, Path, description = "Bill id")),
    responses(
        (status = 204, description = "Bill deleted; its lines are billable again"),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
pub async fn delete_bill(
    State(state): State<AppState>,
    StaffActor(actor): StaffActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let billing = state.services.billing.clone();
    blocking(move || billing.delete_bill(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
