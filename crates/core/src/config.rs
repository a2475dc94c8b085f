//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into core services, so request
//! handling never reads process-wide environment variables.

use crate::constants::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_PATH};
use crate::{ClinicError, ClinicResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_path: PathBuf,
    busy_timeout: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(database_path: PathBuf, busy_timeout: Duration) -> ClinicResult<Self> {
        if database_path.as_os_str().is_empty() {
            return Err(ClinicError::Config("database path cannot be empty".into()));
        }
        if busy_timeout.is_zero() {
            return Err(ClinicError::Config("busy timeout must be positive".into()));
        }

        Ok(Self {
            database_path,
            busy_timeout,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }
}

/// Resolve configuration from optional raw values (typically environment variables).
///
/// Empty or whitespace-only values fall back to the defaults.
pub fn core_config_from_env_values(
    database_path: Option<String>,
    busy_timeout_ms: Option<String>,
) -> ClinicResult<CoreConfig> {
    let database_path = database_path
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

    let busy_timeout_ms = busy_timeout_ms
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| ClinicError::Config(format!("invalid busy timeout: {v}")))
        })
        .transpose()?
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

    CoreConfig::new(
        PathBuf::from(database_path),
        Duration::from_millis(busy_timeout_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_missing_or_blank_values() {
        let cfg = core_config_from_env_values(None, Some("  ".into())).unwrap();
        assert_eq!(cfg.database_path(), Path::new(DEFAULT_DATABASE_PATH));
        assert_eq!(
            cfg.busy_timeout(),
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = core_config_from_env_values(None, Some("soon".into())).unwrap_err();
        assert!(matches!(err, ClinicError::Config(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = core_config_from_env_values(Some("x.db".into()), Some("0".into())).unwrap_err();
        assert!(matches!(err, ClinicError::Config(_)));
    }
}
