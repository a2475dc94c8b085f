//! Transport DTOs.
//!
//! Requests convert into core inputs with `TryFrom`, which is where field-level validation
//! errors surface. Responses are built from core models with `From`.

use chrono::{DateTime, NaiveDate, Utc};
use clinicdesk_core::models::{
    Bill, BillPage, BillableGroup, BillingLine, Diagnosis, Doctor, DoctorAttribution, DoctorRef,
    EncounterStatus, EncounterUpdate, EncounterView, Medicine, MedicineRef, NewEncounter,
    NewPrescription, Prescription, VocabularyEntry,
};
use clinicdesk_core::{ClinicError, ClinicResult};
use clinicdesk_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

fn required(field: &str, value: &str) -> ClinicResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|_| ClinicError::InvalidRequest(format!("{field} is required")))
}

// ============================================================================
// REQUESTS
// ============================================================================

/// A doctor's internal key (number) or doctor code (string).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DoctorRefReq {
    Key(i64),
    Code(String),
}

impl From<DoctorRefReq> for DoctorRef {
    fn from(value: DoctorRefReq) -> Self {
        match value {
            DoctorRefReq::Key(key) => DoctorRef::Key(key),
            DoctorRefReq::Code(code) => DoctorRef::Code(code),
        }
    }
}

/// A medicine id (number) or exact medicine name (string).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MedicineRefReq {
    Id(i64),
    Name(String),
}

impl From<MedicineRefReq> for MedicineRef {
    fn from(value: MedicineRefReq) -> Self {
        match value {
            MedicineRefReq::Id(id) => MedicineRef::Id(id),
            MedicineRefReq::Name(name) => MedicineRef::Name(name),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEncounterReq {
    pub patient_id: i64,
    pub doctor: Option<DoctorRefReq>,
    pub diagnosis: Option<String>,
    /// Set to record the encounter without a diagnosis.
    #[serde(default)]
    pub diagnosis_unspecified: bool,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    #[serde(default)]
    pub symptom_ids: Vec<i64>,
    #[serde(default)]
    pub condition_ids: Vec<i64>,
    /// `completed` (default), `pending` or `cancelled`.
    pub status: Option<String>,
}

impl TryFrom<CreateEncounterReq> for NewEncounter {
    type Error = ClinicError;

    fn try_from(req: CreateEncounterReq) -> ClinicResult<Self> {
        let status = match req.status.as_deref() {
            Some(status) => status.parse()?,
            None => EncounterStatus::default(),
        };
        Ok(NewEncounter {
            patient_id: req.patient_id,
            doctor_ref: req.doctor.map(DoctorRef::from),
            diagnosis: Diagnosis::from_input(req.diagnosis.as_deref(), req.diagnosis_unspecified)?,
            treatment_plan: req.treatment_plan,
            notes: req.notes,
            follow_up_date: req.follow_up_date,
            symptom_ids: req.symptom_ids,
            condition_ids: req.condition_ids,
            status,
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateEncounterReq {
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

impl TryFrom<UpdateEncounterReq> for EncounterUpdate {
    type Error = ClinicError;

    fn try_from(req: UpdateEncounterReq) -> ClinicResult<Self> {
        Ok(EncounterUpdate {
            diagnosis: req
                .diagnosis
                .as_deref()
                .map(|d| Diagnosis::from_input(Some(d), false))
                .transpose()?,
            treatment_plan: req.treatment_plan,
            status: req
                .status
                .as_deref()
                .map(str::parse::<EncounterStatus>)
                .transpose()?,
            notes: req.notes,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct IssuePrescriptionReq {
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub medicine: MedicineRefReq,
    pub dosage: String,
    pub instructions: Option<String>,
    /// Blank or absent means "none".
    pub illness: Option<String>,
    pub doctor_name: String,
    pub request_token: Option<Uuid>,
}

impl TryFrom<IssuePrescriptionReq> for NewPrescription {
    type Error = ClinicError;

    fn try_from(req: IssuePrescriptionReq) -> ClinicResult<Self> {
        Ok(NewPrescription {
            patient_id: req.patient_id,
            encounter_id: req.encounter_id,
            medicine: req.medicine.into(),
            dosage: required("dosage", &req.dosage)?,
            instructions: req.instructions,
            illness: req.illness,
            doctor_name: required("doctor_name", &req.doctor_name)?,
            request_token: req.request_token,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateBillReq {
    pub patient_id: i64,
    pub request_token: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateBillStatusReq {
    /// `pending`, `paid` or `overdue`.
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AddVocabularyReq {
    pub name: String,
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DoctorAttributionRes {
    /// `linked`, `unlinked`, `inferred` or `unassigned`.
    pub state: String,
    pub display_name: String,
    pub department: String,
    pub staff_id: Option<i64>,
    pub doctor_code: Option<String>,
    /// Notes text the doctor was inferred from; display only.
    pub inferred_from: Option<String>,
}

impl From<&DoctorAttribution> for DoctorAttributionRes {
    fn from(value: &DoctorAttribution) -> Self {
        let (state, staff_id, doctor_code, inferred_from) = match value {
            DoctorAttribution::Linked { staff_id, .. } => ("linked", Some(*staff_id), None, None),
            DoctorAttribution::Unlinked { doctor_code, .. } => {
                ("unlinked", None, Some(doctor_code.clone()), None)
            }
            DoctorAttribution::Inferred {
                source_text,
                matched_doctor_code,
                ..
            } => (
                "inferred",
                None,
                matched_doctor_code.clone(),
                Some(source_text.clone()),
            ),
            DoctorAttribution::Unassigned => ("unassigned", None, None, None),
        };
        Self {
            state: state.into(),
            display_name: value.display_name().into(),
            department: value.department().into(),
            staff_id,
            doctor_code,
            inferred_from,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncounterRes {
    pub id: i64,
    pub patient_id: i64,
    pub patient_name: String,
    pub doctor: DoctorAttributionRes,
    pub diagnosis: String,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub status: String,
    pub symptoms: Vec<String>,
    pub conditions: Vec<String>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EncounterView> for EncounterRes {
    fn from(view: EncounterView) -> Self {
        let doctor = DoctorAttributionRes::from(&view.doctor);
        let e = view.encounter;
        Self {
            id: e.id,
            patient_id: e.patient_id,
            patient_name: view.patient_name,
            doctor,
            diagnosis: e.diagnosis.as_str().to_string(),
            treatment_plan: e.treatment_plan,
            notes: e.notes,
            follow_up_date: e.follow_up_date,
            status: e.status.as_str().into(),
            symptoms: view.symptoms,
            conditions: view.conditions,
            recorded_by: e.recorded_by,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionRes {
    pub id: i64,
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub medicine_id: i64,
    pub dosage: String,
    pub instructions: Option<String>,
    pub illness: String,
    pub doctor_name: String,
    pub issued_by: String,
    pub bill_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<Prescription> for PrescriptionRes {
    fn from(p: Prescription) -> Self {
        Self {
            id: p.id,
            patient_id: p.patient_id,
            encounter_id: p.encounter_id,
            medicine_id: p.medicine_id,
            dosage: p.dosage,
            instructions: p.instructions,
            illness: p.illness.as_str().into(),
            doctor_name: p.doctor_name,
            issued_by: p.issued_by,
            bill_id: p.bill_id,
            created_at: p.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillingLineRes {
    pub prescription_id: i64,
    pub medicine_id: i64,
    pub medicine_name: String,
    pub price_minor: i64,
    pub dosage: String,
    pub instructions: Option<String>,
    pub illness: String,
    pub stock_quantity: i64,
    pub bill_id: Option<i64>,
}

impl From<BillingLine> for BillingLineRes {
    fn from(l: BillingLine) -> Self {
        Self {
            prescription_id: l.prescription_id,
            medicine_id: l.medicine_id,
            medicine_name: l.medicine_name,
            price_minor: l.price_minor,
            dosage: l.dosage,
            instructions: l.instructions,
            illness: l.illness.as_str().into(),
            stock_quantity: l.stock_quantity,
            bill_id: l.bill_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillableGroupRes {
    pub patient_id: i64,
    pub patient_name: String,
    pub doctor_name: String,
    pub prescriptions: Vec<BillingLineRes>,
    pub total_minor: i64,
}

impl From<BillableGroup> for BillableGroupRes {
    fn from(g: BillableGroup) -> Self {
        Self {
            patient_id: g.patient_id,
            patient_name: g.patient_name,
            doctor_name: g.doctor_name,
            prescriptions: g.prescriptions.into_iter().map(Into::into).collect(),
            total_minor: g.total_minor,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillRes {
    pub id: i64,
    pub invoice_number: String,
    pub patient_id: i64,
    pub patient_name: String,
    pub doctor_name: String,
    pub amount_minor: i64,
    pub status: String,
    pub date: NaiveDate,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<Bill> for BillRes {
    fn from(b: Bill) -> Self {
        Self {
            id: b.id,
            invoice_number: b.invoice_number,
            patient_id: b.patient_id,
            patient_name: b.patient_name,
            doctor_name: b.doctor_name,
            amount_minor: b.amount_minor,
            status: b.status.as_str().into(),
            date: b.date,
            created_by: b.created_by,
            created_at: b.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillPageRes {
    pub bills: Vec<BillRes>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u32,
    pub items_per_page: u32,
}

impl From<BillPage> for BillPageRes {
    fn from(p: BillPage) -> Self {
        Self {
            bills: p.bills.into_iter().map(Into::into).collect(),
            current_page: p.current_page,
            total_pages: p.total_pages,
            total_items: p.total_items,
            items_per_page: p.items_per_page,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DoctorRes {
    pub id: i64,
    pub doctor_code: String,
    pub name: String,
    pub specialization: Option<String>,
    pub department: String,
}

impl From<Doctor> for DoctorRes {
    fn from(d: Doctor) -> Self {
        Self {
            name: d.full_name(),
            department: d.department_or_default(),
            id: d.id,
            doctor_code: d.doctor_code,
            specialization: d.specialization,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MedicineRes {
    pub id: i64,
    pub name: String,
    pub price_minor: i64,
    pub stock_quantity: i64,
    pub description: Option<String>,
}

impl From<Medicine> for MedicineRes {
    fn from(m: Medicine) -> Self {
        Self {
            id: m.id,
            name: m.name,
            price_minor: m.price_minor,
            stock_quantity: m.stock_quantity,
            description: m.description,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VocabularyEntryRes {
    pub id: i64,
    pub name: String,
}

impl From<VocabularyEntry> for VocabularyEntryRes {
    fn from(v: VocabularyEntry) -> Self {
        Self { id: v.id, name: v.name }
    }
}

/// Error body returned by every API surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub kind: String,
    pub message: String,
    /// Context needed to resolve the error without retrying.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ErrorRes {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<&ClinicError> for ErrorRes {
    fn from(err: &ClinicError) -> Self {
        let details = match err {
            ClinicError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            ClinicError::InvalidReference { kind, id } => Some(json!({ "kind": kind, "id": id })),
            ClinicError::UnknownDoctor {
                attempted,
                valid_codes,
            } => Some(json!({ "attempted": attempted, "valid_codes": valid_codes })),
            ClinicError::DuplicatePrescription {
                patient_id,
                medicine,
                illness,
                existing_prescription_id,
            } => Some(json!({
                "patient_id": patient_id,
                "medicine": medicine,
                "illness": illness.as_str(),
                "existing_prescription_id": existing_prescription_id,
            })),
            ClinicError::OutOfStock {
                medicine_id,
                medicine,
            } => Some(json!({ "medicine_id": medicine_id, "medicine": medicine })),
            ClinicError::AlreadyBilled {
                patient_id,
                bill_id,
                invoice_number,
            } => Some(json!({
                "patient_id": patient_id,
                "bill_id": bill_id,
                "invoice_number": invoice_number,
            })),
            ClinicError::TransactionFailure(_) => Some(json!({ "retryable": true })),
            _ => None,
        };
        Self {
            kind: err.kind().into(),
            message: err.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_encounter_defaults_to_completed_and_requires_diagnosis() {
        let req: CreateEncounterReq = serde_json::from_value(json!({
            "patient_id": 4,
            "doctor": "DOC001",
            "diagnosis": "Malaria",
            "symptom_ids": [1, 2]
        }))
        .unwrap();
        let new = NewEncounter::try_from(req.clone()).unwrap();
        assert_eq!(new.status, EncounterStatus::Completed);
        assert_eq!(new.doctor_ref, Some(DoctorRef::Code("DOC001".into())));

        let missing = CreateEncounterReq {
            diagnosis: None,
            ..req
        };
        assert!(matches!(
            NewEncounter::try_from(missing),
            Err(ClinicError::InvalidRequest(_))
        ));
    }

    #[test]
    fn doctor_key_deserialises_from_number() {
        let req: CreateEncounterReq = serde_json::from_value(json!({
            "patient_id": 4,
            "doctor": 12,
            "diagnosis_unspecified": true
        }))
        .unwrap();
        let new = NewEncounter::try_from(req).unwrap();
        assert_eq!(new.doctor_ref, Some(DoctorRef::Key(12)));
        assert_eq!(new.diagnosis, Diagnosis::Unspecified);
    }

    #[test]
    fn issue_prescription_names_the_missing_field() {
        let req: IssuePrescriptionReq = serde_json::from_value(json!({
            "patient_id": 1,
            "medicine": "Aspirin",
            "dosage": "  ",
            "doctor_name": "Dr. Esi Asante"
        }))
        .unwrap();
        match NewPrescription::try_from(req) {
            Err(ClinicError::InvalidRequest(msg)) => assert_eq!(msg, "dosage is required"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn error_body_carries_resolution_context() {
        let err = ClinicError::AlreadyBilled {
            patient_id: 3,
            bill_id: 9,
            invoice_number: "#0004".into(),
        };
        let body = ErrorRes::from(&err);
        assert_eq!(body.kind, "AlreadyBilled");
        assert_eq!(
            body.details,
            Some(json!({ "patient_id": 3, "bill_id": 9, "invoice_number": "#0004" }))
        );
    }
}
