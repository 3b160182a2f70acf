//! CDD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::PathBuf;

use thiserror::Error;

use crate::model::AppKey;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CddError>;

/// Top-level error type for the computation-dependency daemon.
#[derive(Debug, Error)]
pub enum CddError {
    #[error("[CDD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CDD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CDD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CDD-2001] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[CDD-2002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CDD-3001] lock for app {app} is busy: {details}")]
    LockBusy { app: AppKey, details: String },

    #[error("[CDD-3002] no application named '{name}' is registered")]
    NoSuchApp { name: String },

    #[error("[CDD-4001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CDD-4900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CddError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CDD-1001",
            Self::MissingConfig { .. } => "CDD-1002",
            Self::ConfigParse { .. } => "CDD-1003",
            Self::Sql { .. } => "CDD-2001",
            Self::Serialization { .. } => "CDD-2002",
            Self::LockBusy { .. } => "CDD-3001",
            Self::NoSuchApp { .. } => "CDD-3002",
            Self::Io { .. } => "CDD-4001",
            Self::Runtime { .. } => "CDD-4900",
        }
    }

    /// Whether retrying might resolve the failure. Lock loss never does:
    /// another live process holds the row.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Sql { .. } | Self::Io { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for SQL failures with a known call site.
    #[must_use]
    pub fn sql(context: &'static str, details: impl ToString) -> Self {
        Self::Sql {
            context,
            details: details.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CddError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for CddError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for CddError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
