//! Run-level error taxonomy for stowage.
//!
//! Only fatal conditions live here. Everything scoped to a single build unit
//! is recorded as a [`ValidationIssue`](crate::domain::issue::ValidationIssue)
//! or a [`BuildResult`](crate::domain::result::BuildResult) instead.

use std::path::PathBuf;

/// Errors that abort a run before any build is dispatched.
#[derive(Debug, thiserror::Error)]
pub enum StowageError {
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while enumerating build units.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("descriptor for unit '{unit}' does not exist: {path}")]
    MissingDescriptor { unit: String, path: PathBuf },

    #[error("context for unit '{unit}' is not a directory: {path}")]
    MissingContext { unit: String, path: PathBuf },

    #[error("unit name '{name}' is claimed by both {first} and {second}")]
    NameCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("scan of {root} matched no build units (pattern '{pattern}')")]
    NoUnits { root: PathBuf, pattern: String },

    #[error("invalid scan pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no units configured: provide [[units]] or a [scan] section")]
    NothingConfigured,
}

/// Result type for stowage run-level operations.
pub type Result<T> = std::result::Result<T, StowageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_collision_displays_both_paths() {
        let err = DiscoveryError::NameCollision {
            name: "api".to_string(),
            first: PathBuf::from("svc/a/Dockerfile.api"),
            second: PathBuf::from("svc/b/Dockerfile.api"),
        };
        let msg = err.to_string();
        assert!(msg.contains("api"));
        assert!(msg.contains("svc/a/Dockerfile.api"));
        assert!(msg.contains("svc/b/Dockerfile.api"));
    }

    #[test]
    fn test_discovery_error_wraps_into_stowage_error() {
        let err: StowageError = DiscoveryError::NothingConfigured.into();
        assert!(err.to_string().starts_with("discovery error"));
    }

    #[test]
    fn test_config_error_display() {
        let err = StowageError::Config("push requested without registry session".to_string());
        assert!(err.to_string().contains("registry session"));
    }
}
