//! TLM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Top-level error type for the telemetry pipeline.
///
/// Only configuration, experiment management and the CLI surface return these.
/// Reporting paths (`report_*`, breadcrumbs, sampling) swallow and log failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("[TLM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TLM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TLM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TLM-2001] unknown experiment: {test_id}")]
    UnknownExperiment { test_id: String },

    #[error("[TLM-2002] invalid experiment definition: {details}")]
    InvalidExperiment { details: String },

    #[error("[TLM-2003] experiment {test_id} cannot move from {from} to {to}")]
    InvalidTransition {
        test_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("[TLM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TLM-2102] scenario parse failure at line {line}: {details}")]
    ScenarioParse { line: usize, details: String },

    #[error("[TLM-3001] platform query failure: {details}")]
    PlatformQuery { details: String },

    #[error("[TLM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TLM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl TelemetryError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TLM-1001",
            Self::MissingConfig { .. } => "TLM-1002",
            Self::ConfigParse { .. } => "TLM-1003",
            Self::UnknownExperiment { .. } => "TLM-2001",
            Self::InvalidExperiment { .. } => "TLM-2002",
            Self::InvalidTransition { .. } => "TLM-2003",
            Self::Serialization { .. } => "TLM-2101",
            Self::ScenarioParse { .. } => "TLM-2102",
            Self::PlatformQuery { .. } => "TLM-3001",
            Self::Io { .. } => "TLM-3002",
            Self::Runtime { .. } => "TLM-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Runtime { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TelemetryError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<TelemetryError> {
        vec![
            TelemetryError::InvalidConfig {
                details: String::new(),
            },
            TelemetryError::MissingConfig {
                path: PathBuf::new(),
            },
            TelemetryError::ConfigParse {
                context: "",
                details: String::new(),
            },
            TelemetryError::UnknownExperiment {
                test_id: String::new(),
            },
            TelemetryError::InvalidExperiment {
                details: String::new(),
            },
            TelemetryError::InvalidTransition {
                test_id: String::new(),
                from: "draft",
                to: "completed",
            },
            TelemetryError::Serialization {
                context: "",
                details: String::new(),
            },
            TelemetryError::ScenarioParse {
                line: 1,
                details: String::new(),
            },
            TelemetryError::PlatformQuery {
                details: String::new(),
            },
            TelemetryError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            TelemetryError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(TelemetryError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_tlm_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("TLM-"),
                "code {} must start with TLM-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = TelemetryError::InvalidTransition {
            test_id: "test_1".to_string(),
            from: "draft",
            to: "completed",
        };
        let msg = err.to_string();
        assert!(msg.contains("TLM-2003"), "missing code: {msg}");
        assert!(msg.contains("test_1"), "missing test id: {msg}");
        assert!(msg.contains("draft"), "missing source state: {msg}");
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            TelemetryError::Runtime {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(TelemetryError::io("/tmp/x", std::io::Error::other("x")).is_retryable());
        assert!(
            !TelemetryError::UnknownExperiment {
                test_id: String::new()
            }
            .is_retryable()
        );
        assert!(
            !TelemetryError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: TelemetryError = json_err.into();
        assert_eq!(err.code(), "TLM-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: TelemetryError = toml_err.into();
        assert_eq!(err.code(), "TLM-1003");
    }
}
