use std::env;

/// Header carrying the API key on mutating requests.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("API_KEY not set in environment")]
    NotConfigured,
    #[error("missing API key")]
    Missing,
    #[error("invalid API key")]
    Invalid,
}

/// Reads the expected API key from `API_KEY`. Blank values count as unset.
pub fn api_key_from_env() -> Option<String> {
    env::var("API_KEY").ok().filter(|k| !k.trim().is_empty())
}

/// Validates the provided API key against the expected one.
///
/// Returns `Ok(())` if the key matches, or an error if it is missing, wrong, or no key is
/// configured at all.
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> Result<(), AuthError> {
    let expected = expected.ok_or(AuthError::NotConfigured)?;
    match provided {
        None => Err(AuthError::Missing),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(AuthError::Invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_key_is_accepted() {
        assert_eq!(validate_api_key(Some("s3cret"), Some("s3cret")), Ok(()));
    }

    #[test]
    fn missing_wrong_and_unconfigured_keys_are_rejected() {
        assert_eq!(validate_api_key(None, Some("s3cret")), Err(AuthError::Missing));
        assert_eq!(
            validate_api_key(Some("guess"), Some("s3cret")),
            Err(AuthError::Invalid)
        );
        assert_eq!(
            validate_api_key(Some("s3cret"), None),
            Err(AuthError::NotConfigured)
        );
    }
}
