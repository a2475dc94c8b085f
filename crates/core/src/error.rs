use crate::models::IllnessLabel;

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {kind} id: {id}")]
    InvalidReference { kind: &'static str, id: i64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("doctor not found: '{attempted}' does not match any doctor code")]
    UnknownDoctor {
        attempted: String,
        valid_codes: Vec<String>,
    },

    #[error(
        "patient {patient_id} already has an unbilled prescription of {medicine} for illness '{illness}' (prescription {existing_prescription_id})"
    )]
    DuplicatePrescription {
        patient_id: i64,
        medicine: String,
        illness: IllnessLabel,
        existing_prescription_id: i64,
    },

    #[error("{medicine} (id {medicine_id}) is out of stock")]
    OutOfStock { medicine_id: i64, medicine: String },

    #[error("patient {patient_id} already has outstanding bill {invoice_number} (id {bill_id})")]
    AlreadyBilled {
        patient_id: i64,
        bill_id: i64,
        invoice_number: String,
    },

    #[error("transaction failed and was rolled back: {0}")]
    TransactionFailure(#[from] rusqlite::Error),

    #[error("store connection is unavailable")]
    StoreUnavailable,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClinicError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ClinicError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ClinicError::NotFound { .. } => "NotFound",
            ClinicError::InvalidReference { .. } => "InvalidReference",
            ClinicError::InvalidRequest(_) => "InvalidRequest",
            ClinicError::UnknownDoctor { .. } => "UnknownDoctor",
            ClinicError::DuplicatePrescription { .. } => "DuplicatePrescription",
            ClinicError::OutOfStock { .. } => "OutOfStock",
            ClinicError::AlreadyBilled { .. } => "AlreadyBilled",
            ClinicError::TransactionFailure(_) => "TransactionFailure",
            ClinicError::StoreUnavailable => "StoreUnavailable",
            ClinicError::Config(_) => "Config",
        }
    }

    /// Only storage-layer rollbacks may be retried by the caller as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClinicError::TransactionFailure(_))
    }
}

impl From<clinicdesk_types::TextError> for ClinicError {
    fn from(err: clinicdesk_types::TextError) -> Self {
        ClinicError::InvalidRequest(err.to_string())
    }
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;
