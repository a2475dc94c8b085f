//! Domain types for the front-desk records store.
//!
//! Row types mirror the SQLite tables; `*View` types are read-after-write projections that carry
//! resolved display names instead of raw ids.

use crate::constants::{DEFAULT_DEPARTMENT, NO_ILLNESS_LABEL, UNSPECIFIED_DIAGNOSIS};
use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, Utc};
use clinicdesk_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// REFERENCE DATA
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub residential_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Clone, Debug)]
pub struct NewPatient {
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub residential_address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Doctor {
    pub id: i64,
    pub doctor_code: String,
    pub first_name: String,
    pub last_name: String,
    pub specialization: Option<String>,
    pub department: Option<String>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn department_or_default(&self) -> String {
        self.department
            .clone()
            .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct NewDoctor {
    pub doctor_code: NonEmptyText,
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub specialization: Option<String>,
    pub department: Option<String>,
}

/// Operational identity used for login. Linked to a [`Doctor`] only by `staff_code == doctor_code`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Staff {
    pub id: i64,
    pub staff_code: String,
    pub full_name: String,
    pub department: Option<String>,
    pub role: String,
}

#[derive(Clone, Debug)]
pub struct NewStaff {
    pub staff_code: NonEmptyText,
    pub full_name: NonEmptyText,
    pub department: Option<String>,
    pub role: NonEmptyText,
}

/// Row of an append-only vocabulary (symptoms, conditions).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VocabularyEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Medicine {
    pub id: i64,
    pub name: String,
    /// Unit price in minor currency units.
    pub price_minor: i64,
    pub stock_quantity: i64,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewMedicine {
    pub name: NonEmptyText,
    pub price_minor: i64,
    pub stock_quantity: i64,
    pub description: Option<String>,
}

// ============================================================================
// REFERENCES SUPPLIED BY CALLERS
// ============================================================================

/// A loosely-typed doctor reference: JSON numbers are internal keys, strings are doctor codes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DoctorRef {
    Key(i64),
    Code(String),
}

impl fmt::Display for DoctorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoctorRef::Key(key) => write!(f, "{key}"),
            DoctorRef::Code(code) => write!(f, "{code}"),
        }
    }
}

/// A medicine given either by id or by its unique name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MedicineRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for MedicineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MedicineRef::Id(id) => write!(f, "{id}"),
            MedicineRef::Name(name) => write!(f, "{name}"),
        }
    }
}

// ============================================================================
// ENCOUNTERS
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncounterStatus {
    #[default]
    Completed,
    Pending,
    Cancelled,
}

impl EncounterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncounterStatus::Completed => "completed",
            EncounterStatus::Pending => "pending",
            EncounterStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EncounterStatus {
    type Err = ClinicError;

    fn from_str(s: &str) -> ClinicResult<Self> {
        match s.trim() {
            "completed" => Ok(EncounterStatus::Completed),
            "pending" => Ok(EncounterStatus::Pending),
            "cancelled" => Ok(EncounterStatus::Cancelled),
            other => Err(ClinicError::InvalidRequest(format!(
                "unknown encounter status: {other}"
            ))),
        }
    }
}

/// A diagnosis is required unless the clinician explicitly marks it as not specified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnosis {
    Stated(NonEmptyText),
    Unspecified,
}

impl Diagnosis {
    /// Builds a diagnosis from request input. Empty text is only accepted with `unspecified`.
    pub fn from_input(text: Option<&str>, unspecified: bool) -> ClinicResult<Self> {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => Ok(Diagnosis::Stated(NonEmptyText::new(text)?)),
            None if unspecified => Ok(Diagnosis::Unspecified),
            None => Err(ClinicError::InvalidRequest("diagnosis is required".into())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Diagnosis::Stated(text) => text.as_str(),
            Diagnosis::Unspecified => UNSPECIFIED_DIAGNOSIS,
        }
    }

    pub(crate) fn from_stored(value: String) -> Self {
        match NonEmptyText::new(&value) {
            Ok(text) if text.as_str() != UNSPECIFIED_DIAGNOSIS => Diagnosis::Stated(text),
            _ => Diagnosis::Unspecified,
        }
    }
}

impl Serialize for Diagnosis {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// How the encounter's doctor column was settled when the encounter was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionState {
    /// The doctor column holds a staff key.
    Linked,
    /// A doctor was named but has no staff row; the code is kept as a display hint only.
    Unlinked,
    /// No doctor was supplied.
    Unassigned,
}

impl AttributionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionState::Linked => "linked",
            AttributionState::Unlinked => "unlinked",
            AttributionState::Unassigned => "unassigned",
        }
    }

    pub(crate) fn from_stored(value: &str) -> Self {
        match value {
            "linked" => AttributionState::Linked,
            "unlinked" => AttributionState::Unlinked,
            _ => AttributionState::Unassigned,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Encounter {
    pub id: i64,
    pub patient_id: i64,
    /// Staff key of the attributed doctor; `None` unless `attribution` is `Linked`.
    pub doctor_staff_id: Option<i64>,
    pub attribution: AttributionState,
    pub attributed_doctor_code: Option<String>,
    pub diagnosis: Diagnosis,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub status: EncounterStatus,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewEncounter {
    pub patient_id: i64,
    pub doctor_ref: Option<DoctorRef>,
    pub diagnosis: Diagnosis,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub symptom_ids: Vec<i64>,
    pub condition_ids: Vec<i64>,
    pub status: EncounterStatus,
}

/// Fields that may change after an encounter is recorded. `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct EncounterUpdate {
    pub diagnosis: Option<Diagnosis>,
    pub treatment_plan: Option<String>,
    pub status: Option<EncounterStatus>,
    pub notes: Option<String>,
}

impl EncounterUpdate {
    pub fn is_empty(&self) -> bool {
        self.diagnosis.is_none()
            && self.treatment_plan.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct EncounterFilter {
    pub patient_id: Option<i64>,
    pub status: Option<EncounterStatus>,
}

/// Who the encounter is attributed to, as shown to readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DoctorAttribution {
    Linked {
        staff_id: i64,
        display_name: String,
        department: String,
    },
    Unlinked {
        doctor_code: String,
        display_name: String,
        department: String,
    },
    /// Best-effort guess from the encounter notes. Display only; never stored.
    Inferred {
        display_name: String,
        department: String,
        source_text: String,
        matched_doctor_code: Option<String>,
    },
    Unassigned,
}

impl DoctorAttribution {
    pub fn display_name(&self) -> &str {
        match self {
            DoctorAttribution::Linked { display_name, .. }
            | DoctorAttribution::Unlinked { display_name, .. }
            | DoctorAttribution::Inferred { display_name, .. } => display_name,
            DoctorAttribution::Unassigned => "Not assigned",
        }
    }

    pub fn department(&self) -> &str {
        match self {
            DoctorAttribution::Linked { department, .. }
            | DoctorAttribution::Unlinked { department, .. }
            | DoctorAttribution::Inferred { department, .. } => department,
            DoctorAttribution::Unassigned => DEFAULT_DEPARTMENT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EncounterView {
    pub encounter: Encounter,
    pub patient_name: String,
    pub doctor: DoctorAttribution,
    pub symptoms: Vec<String>,
    pub conditions: Vec<String>,
}

// ============================================================================
// PRESCRIPTIONS
// ============================================================================

/// Normalised illness label used by the duplicate-prescription rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IllnessLabel(String);

impl IllnessLabel {
    pub fn new(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(label) => IllnessLabel(label.to_string()),
            None => IllnessLabel(NO_ILLNESS_LABEL.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IllnessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Prescription {
    pub id: i64,
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub medicine_id: i64,
    pub dosage: String,
    pub instructions: Option<String>,
    pub illness: IllnessLabel,
    pub doctor_name: String,
    pub issued_by: String,
    pub bill_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewPrescription {
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub medicine: MedicineRef,
    pub dosage: NonEmptyText,
    pub instructions: Option<String>,
    pub illness: Option<String>,
    pub doctor_name: NonEmptyText,
    pub request_token: Option<Uuid>,
}

// ============================================================================
// BILLING
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Paid,
    Overdue,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Paid => "paid",
            BillStatus::Overdue => "overdue",
        }
    }

    /// Every status except `paid` keeps the bill outstanding.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, BillStatus::Paid)
    }
}

impl FromStr for BillStatus {
    type Err = ClinicError;

    fn from_str(s: &str) -> ClinicResult<Self> {
        match s.trim() {
            "pending" => Ok(BillStatus::Pending),
            "paid" => Ok(BillStatus::Paid),
            "overdue" => Ok(BillStatus::Overdue),
            other => Err(ClinicError::InvalidRequest(format!(
                "unknown bill status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Bill {
    pub id: i64,
    pub invoice_number: String,
    pub patient_id: i64,
    pub patient_name: String,
    pub doctor_name: String,
    pub amount_minor: i64,
    pub status: BillStatus,
    pub date: NaiveDate,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BillingLine {
    pub prescription_id: i64,
    pub medicine_id: i64,
    pub medicine_name: String,
    pub price_minor: i64,
    pub dosage: String,
    pub instructions: Option<String>,
    pub illness: IllnessLabel,
    pub stock_quantity: i64,
    pub bill_id: Option<i64>,
}

/// A patient's prescriptions grouped for billing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BillableGroup {
    pub patient_id: i64,
    pub patient_name: String,
    pub doctor_name: String,
    pub prescriptions: Vec<BillingLine>,
    pub total_minor: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BillPage {
    pub bills: Vec<Bill>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u32,
    pub items_per_page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_requires_text_unless_marked_unspecified() {
        assert!(matches!(
            Diagnosis::from_input(Some("   "), false),
            Err(ClinicError::InvalidRequest(_))
        ));
        assert_eq!(
            Diagnosis::from_input(None, true).unwrap(),
            Diagnosis::Unspecified
        );
        assert_eq!(
            Diagnosis::from_input(Some(" Malaria "), true)
                .unwrap()
                .as_str(),
            "Malaria"
        );
    }

    #[test]
    fn stored_sentinel_reads_back_as_unspecified() {
        assert_eq!(
            Diagnosis::from_stored(UNSPECIFIED_DIAGNOSIS.to_string()),
            Diagnosis::Unspecified
        );
    }

    #[test]
    fn illness_label_normalises_blank_to_none() {
        assert_eq!(IllnessLabel::new(None), IllnessLabel::new(Some("  ")));
        assert_eq!(IllnessLabel::new(Some(" Typhoid ")).as_str(), "Typhoid");
    }

    #[test]
    fn doctor_ref_deserialises_numbers_as_keys_and_strings_as_codes() {
        let key: DoctorRef = serde_json::from_str("7").unwrap();
        let code: DoctorRef = serde_json::from_str("\"DOC007\"").unwrap();
        assert_eq!(key, DoctorRef::Key(7));
        assert_eq!(code, DoctorRef::Code("DOC007".into()));
    }

    #[test]
    fn only_paid_bills_are_closed() {
        assert!(BillStatus::Pending.is_outstanding());
        assert!(BillStatus::Overdue.is_outstanding());
        assert!(!BillStatus::Paid.is_outstanding());
        assert!("refunded".parse::<BillStatus>().is_err());
    }
}
