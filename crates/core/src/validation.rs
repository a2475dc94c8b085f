//! Input validation utilities.
//!
//! Checks applied to caller input before it reaches the store.

use crate::{ClinicError, ClinicResult};
use clinicdesk_types::NonEmptyText;

/// Longest accepted vocabulary name (symptoms, conditions).
const MAX_VOCABULARY_NAME_LEN: usize = 120;

/// Trims optional free text, turning blank input into `None`.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates a symptom or condition name.
///
/// Names are matched case-sensitively, so only surrounding whitespace is normalised.
pub fn validate_vocabulary_name(name: &str) -> ClinicResult<NonEmptyText> {
    let name = NonEmptyText::bounded(name, MAX_VOCABULARY_NAME_LEN)?;
    if name.as_str().contains(['\n', '\r']) {
        return Err(ClinicError::InvalidRequest(
            "vocabulary names must be single-line".into(),
        ));
    }
    Ok(name)
}

/// Validates a unit price in minor currency units.
pub fn validate_price_minor(price_minor: i64) -> ClinicResult<i64> {
    if price_minor < 0 {
        return Err(ClinicError::InvalidRequest(
            "price cannot be negative".into(),
        ));
    }
    Ok(price_minor)
}

/// Validates a stock quantity or restock amount.
pub fn validate_quantity(quantity: i64, allow_zero: bool) -> ClinicResult<i64> {
    if quantity < 0 || (!allow_zero && quantity == 0) {
        return Err(ClinicError::InvalidRequest(format!(
            "invalid stock quantity: {quantity}"
        )));
    }
    Ok(quantity)
}

/// Removes repeated ids while keeping first-seen order.
pub fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_text_drops_blank_values() {
        assert_eq!(optional_text(Some("  ".into())), None);
        assert_eq!(optional_text(Some(" rest ".into())), Some("rest".into()));
    }

    #[test]
    fn vocabulary_name_rejects_multiline() {
        assert!(validate_vocabulary_name("Head\nache").is_err());
        assert_eq!(
            validate_vocabulary_name(" Headache ").unwrap().as_str(),
            "Headache"
        );
    }

    #[test]
    fn dedup_ids_keeps_first_occurrence_order() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn restock_requires_positive_quantity() {
        assert!(validate_quantity(0, false).is_err());
        assert!(validate_quantity(0, true).is_ok());
        assert!(validate_quantity(-1, true).is_err());
    }
}
