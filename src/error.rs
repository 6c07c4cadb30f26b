//! # Error Handling
//!
//! This module defines the centralized error type for `aptly-reconcile`. It
//! uses `thiserror` to build a single `Error` enum covering every failure the
//! reconciliation core can report, each variant carrying enough context
//! (entity name, operation kind, captured diagnostic) to act on it.
//!
//! ## Taxonomy
//!
//! - **`StateUnavailable`**: live state could not be read from aptly or gpg.
//!   Fatal for the whole run: nothing destructive is decided on unknown state.
//! - **`ConfigReference`**: the configuration names an entity that is not
//!   defined anywhere in the document. Detected statically, before any
//!   external call.
//! - **`CycleDetected`**: snapshot merges or publish sources form a cycle.
//!   Fatal for the run.
//! - **`Planning`**: one entity cannot be planned, e.g. a merge source
//!   instance neither exists nor is created earlier in the run. Local to
//!   that entity; its dependents are skipped.
//! - **`OperationFailed`**: one aptly/gpg invocation returned a non-success
//!   status. Recorded in the run summary; dependents are skipped.
//!
//! Retention guard skips are not errors; see [`crate::report::Warning`].
//!
//! The `Result` alias is used across the library to keep signatures short.

use thiserror::Error;

/// Main error type for aptly-reconcile operations
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration document could not be parsed or failed a schema check.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An entity references a name that is not defined in the configuration.
    #[error("Configuration reference error: {entity} references undefined {missing}")]
    ConfigReference { entity: String, missing: String },

    /// Live state could not be obtained from the external tools.
    #[error("State unavailable: {message}")]
    StateUnavailable { message: String },

    /// The dependency graph between snapshots and publishes is cyclic.
    #[error("Cycle detected in entity dependencies: {cycle}")]
    CycleDetected { cycle: String },

    /// An entity cannot be planned against the current live state.
    #[error("Cannot plan {entity}: {message}")]
    Planning { entity: String, message: String },

    /// A single external operation failed.
    #[error("Operation {operation} failed for {entity}: {diagnostic}")]
    OperationFailed {
        entity: String,
        operation: String,
        diagnostic: String,
    },

    /// A timestamp, schedule or duration could not be interpreted.
    #[error("Timestamp error: {message}")]
    Timestamp { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A TOML parsing error, wrapped from `toml::de::Error`.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A TOML serialization error, wrapped from `toml::ser::Error`.
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl Error {
    /// Shorthand for a [`Error::StateUnavailable`] with the given message.
    pub fn state(message: impl Into<String>) -> Self {
        Error::StateUnavailable {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::ConfigParse`] without a hint.
    pub fn config(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            hint: None,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config_parse() {
        let error = Error::ConfigParse {
            message: "Invalid TOML".to_string(),
            hint: None,
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration parsing error"));
        assert!(display.contains("Invalid TOML"));
        assert!(!display.contains("hint:"));
    }

    #[test]
    fn test_error_display_config_parse_with_hint() {
        let error = Error::ConfigParse {
            message: "snapshot 'nightly-%T' has no timestamp".to_string(),
            hint: Some("Add a [snapshot.\"nightly-%T\".timestamp] table".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("hint:"));
        assert!(display.contains("timestamp] table"));
    }

    #[test]
    fn test_error_display_config_reference() {
        let error = Error::ConfigReference {
            entity: "snapshot merged".to_string(),
            missing: "snapshot B".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration reference error"));
        assert!(display.contains("snapshot merged"));
        assert!(display.contains("undefined snapshot B"));
    }

    #[test]
    fn test_error_display_state_unavailable() {
        let error = Error::state("aptly mirror list -raw exited with 1");
        let display = format!("{}", error);
        assert!(display.contains("State unavailable"));
        assert!(display.contains("exited with 1"));
    }

    #[test]
    fn test_error_display_cycle_detected() {
        let error = Error::CycleDetected {
            cycle: "snapshot a -> snapshot b -> snapshot a".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Cycle detected"));
        assert!(display.contains("snapshot a -> snapshot b -> snapshot a"));
    }

    #[test]
    fn test_error_display_planning() {
        let error = Error::Planning {
            entity: "snapshot merged-%T".to_string(),
            message: "source nightly-20240101T0000Z does not exist".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.starts_with("Cannot plan snapshot merged-%T"));
        assert!(display.contains("does not exist"));
    }

    #[test]
    fn test_error_display_operation_failed() {
        let error = Error::OperationFailed {
            entity: "publish ./stable".to_string(),
            operation: "switch-publish".to_string(),
            diagnostic: "unable to sign".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("switch-publish"));
        assert!(display.contains("publish ./stable"));
        assert!(display.contains("unable to sign"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "aptly not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("aptly not found"));
    }

    #[test]
    fn test_error_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("mirror = [unclosed").unwrap_err();
        let error: Error = toml_error.into();
        assert!(format!("{}", error).contains("TOML parsing error"));
    }

    #[test]
    fn test_error_from_yaml_error() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: [unclosed").unwrap_err();
        let error: Error = yaml_error.into();
        assert!(format!("{}", error).contains("YAML parsing error"));
    }
}
