//! # API REST
//!
//! REST API implementation for ClinicDesk.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialisation, CORS, API-key and staff headers)
//!
//! Uses `api-shared` for DTOs and utilities, `clinicdesk-core` for every business rule.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod extract;
pub mod handlers;

use api_shared::{validate_api_key, API_KEY_HEADER};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use clinicdesk_core::ClinicServices;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::ApiError;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: ClinicServices,
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// `api_key` is the key mutating requests must present; `None` rejects every mutation.
    pub fn new(services: ClinicServices, api_key: Option<String>) -> Self {
        Self {
            services,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_doctors,
        handlers::list_symptoms,
        handlers::add_symptom,
        handlers::list_conditions,
        handlers::add_condition,
        handlers::list_medicines,
        handlers::create_encounter,
        handlers::list_encounters,
        handlers::get_encounter,
        handlers::update_encounter,
        handlers::delete_encounter,
        handlers::issue_prescription,
        handlers::list_prescriptions,
        handlers::get_prescription,
        handlers::cancel_prescription,
        handlers::list_billable,
        handlers::generate_bill,
        handlers::list_bills,
        handlers::get_bill,
        handlers::update_bill_status,
        handlers::delete_bill,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::dto::AddVocabularyReq,
        api_shared::dto::BillPageRes,
        api_shared::dto::BillRes,
        api_shared::dto::BillableGroupRes,
        api_shared::dto::BillingLineRes,
        api_shared::dto::CreateEncounterReq,
        api_shared::dto::DoctorAttributionRes,
        api_shared::dto::DoctorRefReq,
        api_shared::dto::DoctorRes,
        api_shared::dto::EncounterRes,
        api_shared::dto::ErrorRes,
        api_shared::dto::GenerateBillReq,
        api_shared::dto::IssuePrescriptionReq,
        api_shared::dto::MedicineRefReq,
        api_shared::dto::MedicineRes,
        api_shared::dto::PrescriptionRes,
        api_shared::dto::UpdateBillStatusReq,
        api_shared::dto::UpdateEncounterReq,
        api_shared::dto::VocabularyEntryRes,
    ))
)]
pub struct ApiDoc;

/// Rejects mutating requests that do not carry the configured `x-api-key`.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(err) = validate_api_key(provided, state.api_key.as_deref()) {
        tracing::warn!("{} {} rejected: {}", req.method(), req.uri().path(), err);
        return Err(err.into());
    }
    Ok(next.run(req).await)
}

/// Builds the full REST router, including Swagger UI at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/doctors", get(handlers::list_doctors))
        .route(
            "/symptoms",
            get(handlers::list_symptoms).post(handlers::add_symptom),
        )
        .route(
            "/conditions",
            get(handlers::list_conditions).post(handlers::add_condition),
        )
        .route("/medicines", get(handlers::list_medicines))
        .route("/encounters", post(handlers::create_encounter))
        .route("/encounters", get(handlers::list_encounters))
        .route("/encounters/:id", get(handlers::get_encounter))
        .route("/encounters/:id", patch(handlers::update_encounter))
        .route("/encounters/:id", delete(handlers::delete_encounter))
        .route("/prescriptions", post(handlers::issue_prescription))
        .route("/prescriptions", get(handlers::list_prescriptions))
        .route("/prescriptions/billable", get(handlers::list_billable))
        .route("/prescriptions/:id", get(handlers::get_prescription))
        .route("/prescriptions/:id", delete(handlers::cancel_prescription))
        .route("/bills", post(handlers::generate_bill))
        .route("/bills", get(handlers::list_bills))
        .route("/bills/:id", get(handlers::get_bill))
        .route("/bills/:id", delete(handlers::delete_bill))
        .route("/bills/:id/status", put(handlers::update_bill_status))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_shared::dto::{BillRes, BillableGroupRes, EncounterRes, ErrorRes};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use clinicdesk_core::models::{NewDoctor, NewMedicine, NewPatient};
    use clinicdesk_core::Database;
    use clinicdesk_types::NonEmptyText;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    struct Fixture {
        state: AppState,
        patient_id: i64,
    }

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).unwrap()
    }

    fn setup() -> Fixture {
        let services = ClinicServices::new(Database::open_in_memory().unwrap());
        let patient_id = services
            .reference
            .add_patient(NewPatient {
                first_name: text("Ama"),
                last_name: text("Owusu"),
                date_of_birth: None,
                gender: None,
                phone_number: None,
                email: None,
                residential_address: None,
            })
            .unwrap()
            .id;
        services
            .reference
            .add_doctor(NewDoctor {
                doctor_code: text("DOC001"),
                first_name: text("Kofi"),
                last_name: text("Boateng"),
                specialization: None,
                department: None,
            })
            .unwrap();
        for (name, price) in [("Aspirin", 250), ("Paracetamol", 400)] {
            services
                .reference
                .add_medicine(NewMedicine {
                    name: text(name),
                    price_minor: price,
                    stock_quantity: 5,
                    description: None,
                })
                .unwrap();
        }
        Fixture {
            state: AppState::new(services, Some(KEY.into())),
            patient_id,
        }
    }

    fn write(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, KEY)
            .header(extract::STAFF_CODE_HEADER, "STF001")
            .header(extract::STAFF_NAME_HEADER, "Abena Darko")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn read(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn health_is_open() {
        let f = setup();
        let (status, body) = send(&f.state, read("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn writes_without_api_key_are_unauthorised() {
        let f = setup();
        let req = Request::builder()
            .method("POST")
            .uri("/symptoms")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "name": "Fever" }).to_string()))
            .unwrap();

        let (status, body) = send(&f.state, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "Unauthorised");
    }

    #[tokio::test]
    async fn writes_without_staff_headers_are_bad_requests() {
        let f = setup();
        let req = Request::builder()
            .method("POST")
            .uri("/bills")
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, KEY)
            .body(Body::from(json!({ "patient_id": f.patient_id }).to_string()))
            .unwrap();

        let (status, body) = send(&f.state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidRequest");
    }

    #[tokio::test]
    async fn prescriptions_bill_once_then_conflict() {
        let f = setup();
        for medicine in ["Aspirin", "Paracetamol"] {
            let (status, _) = send(
                &f.state,
                write(
                    "POST",
                    "/prescriptions",
                    json!({
                        "patient_id": f.patient_id,
                        "medicine": medicine,
                        "dosage": "1 tablet",
                        "doctor_name": "Dr. Kofi Boateng"
                    }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = send(&f.state, read("/prescriptions/billable")).await;
        assert_eq!(status, StatusCode::OK);
        let groups: Vec<BillableGroupRes> = serde_json::from_value(body).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total_minor, 650);

        let (status, body) = send(
            &f.state,
            write("POST", "/bills", json!({ "patient_id": f.patient_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let bill: BillRes = serde_json::from_value(body).unwrap();
        assert_eq!(bill.invoice_number, "#0001");
        assert_eq!(bill.amount_minor, 650);
        assert_eq!(bill.created_by, "Abena Darko (STF001)");

        let (status, body) = send(
            &f.state,
            write("POST", "/bills", json!({ "patient_id": f.patient_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: ErrorRes = serde_json::from_value(body).unwrap();
        assert_eq!(err.kind, "AlreadyBilled");
        assert_eq!(err.details.unwrap()["invoice_number"], "#0001");
    }

    #[tokio::test]
    async fn duplicate_prescription_reports_existing_line() {
        let f = setup();
        let req = || {
            write(
                "POST",
                "/prescriptions",
                json!({
                    "patient_id": f.patient_id,
                    "medicine": "Aspirin",
                    "dosage": "1 tablet",
                    "illness": "Headache",
                    "doctor_name": "Dr. Kofi Boateng"
                }),
            )
        };
        let (_, first) = send(&f.state, req()).await;
        let (status, body) = send(&f.state, req()).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "DuplicatePrescription");
        assert_eq!(body["details"]["existing_prescription_id"], first["id"]);
    }

    #[tokio::test]
    async fn encounter_with_unknown_doctor_lists_valid_codes() {
        let f = setup();
        let (status, body) = send(
            &f.state,
            write(
                "POST",
                "/encounters",
                json!({
                    "patient_id": f.patient_id,
                    "doctor": "DOC404",
                    "diagnosis": "Malaria"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "UnknownDoctor");
        assert_eq!(body["details"]["valid_codes"], json!(["DOC001"]));
    }

    #[tokio::test]
    async fn encounter_round_trip_and_missing_id() {
        let f = setup();
        let (status, body) = send(
            &f.state,
            write(
                "POST",
                "/encounters",
                json!({
                    "patient_id": f.patient_id,
                    "doctor": "DOC001",
                    "diagnosis": "Malaria"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: EncounterRes = serde_json::from_value(body).unwrap();
        assert_eq!(created.doctor.state, "unlinked");
        assert_eq!(created.doctor.display_name, "Kofi Boateng");

        let (status, body) = send(&f.state, read(&format!("/encounters/{}", created.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diagnosis"], "Malaria");

        let (status, body) = send(&f.state, read("/encounters/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let f = setup();
        let (status, body) = send(&f.state, read("/api-docs/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/bills"].is_object());
    }
}
