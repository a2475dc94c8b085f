//! Store-backed services.
//!
//! `reference` holds plain lookup tables; `encounters`, `prescriptions` and `billing` are the
//! reconcilers that keep multi-row state consistent. `doctors` resolves doctor references for
//! them.

pub mod billing;
pub mod doctors;
pub mod encounters;
pub mod prescriptions;
pub mod reference;
pub mod shared;
