//! Constants used throughout the clinicdesk core crate.

/// Default SQLite database file when no explicit path is configured.
pub const DEFAULT_DATABASE_PATH: &str = "clinicdesk.db";

/// Default time a writer waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Stored in place of a diagnosis the clinician explicitly marked as not specified.
pub const UNSPECIFIED_DIAGNOSIS: &str = "Not specified";

/// Normalised label for prescriptions issued without an illness.
pub const NO_ILLNESS_LABEL: &str = "none";

/// Department shown when neither staff nor doctor records carry one.
pub const DEFAULT_DEPARTMENT: &str = "General";

/// Label that introduces the consulting doctor inside free-text encounter notes.
pub const CONSULTING_DOCTOR_LABEL: &str = "Consulting Doctor:";

/// Display prefix for invoice numbers (`#0001`).
pub const INVOICE_PREFIX: char = '#';

/// Minimum digit width for invoice numbers.
pub const INVOICE_DIGITS: usize = 4;

/// Upper bound for page size when listing bills.
pub const MAX_PAGE_LIMIT: u32 = 1_000;
