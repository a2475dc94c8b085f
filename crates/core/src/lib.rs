//! # ClinicDesk Core
//!
//! Business logic for the clinic front-desk records system.
//!
//! This crate owns the SQLite store and every rule that spans more than one row:
//! - encounter recording with symptom/condition tags and doctor attribution
//! - prescription issue against medicine stock
//! - billing reconciliation (one outstanding bill per patient)
//!
//! **No API concerns**: HTTP servers, API keys and request parsing belong in `api-rest` or
//! `api-shared`.

pub mod actor;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod validation;

pub use actor::Actor;
pub use config::{core_config_from_env_values, CoreConfig};
pub use db::Database;
pub use error::{ClinicError, ClinicResult};
pub use repositories::billing::BillingService;
pub use repositories::doctors::{DoctorDirectory, DoctorResolution};
pub use repositories::encounters::EncounterService;
pub use repositories::prescriptions::PrescriptionService;
pub use repositories::reference::{ReferenceStore, Vocabulary};

/// Every service over one shared store handle.
#[derive(Clone, Debug)]
pub struct ClinicServices {
    pub reference: ReferenceStore,
    pub doctors: DoctorDirectory,
    pub encounters: EncounterService,
    pub prescriptions: PrescriptionService,
    pub billing: BillingService,
}

impl ClinicServices {
    pub fn new(db: Database) -> Self {
        Self {
            reference: ReferenceStore::new(db.clone()),
            doctors: DoctorDirectory::new(db.clone()),
            encounters: EncounterService::new(db.clone()),
            prescriptions: PrescriptionService::new(db.clone()),
            billing: BillingService::new(db),
        }
    }

    /// Opens the configured database and builds the services over it.
    pub fn open(cfg: &CoreConfig) -> ClinicResult<Self> {
        Ok(Self::new(Database::open(cfg)?))
    }
}
