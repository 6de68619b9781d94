//! AUX-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, AuxError>;

/// Top-level error type for the auxiliary inventory scanner.
#[derive(Debug, Error)]
pub enum AuxError {
    #[error("[AUX-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[AUX-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[AUX-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[AUX-2001] directory unavailable: {path}: {details}")]
    DirectoryUnavailable { path: PathBuf, details: String },

    #[error("[AUX-2002] file unreadable: {path}: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "[AUX-2003] memory exhausted after {files_visited} entries in {root}; \
         raise the memory limit and try again"
    )]
    MemoryExhausted { root: PathBuf, files_visited: u64 },

    #[error("[AUX-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[AUX-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[AUX-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AuxError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "AUX-1001",
            Self::MissingConfig { .. } => "AUX-1002",
            Self::ConfigParse { .. } => "AUX-1003",
            Self::DirectoryUnavailable { .. } => "AUX-2001",
            Self::FileUnreadable { .. } => "AUX-2002",
            Self::MemoryExhausted { .. } => "AUX-2003",
            Self::Serialization { .. } => "AUX-2101",
            Self::Sql { .. } => "AUX-2102",
            Self::Io { .. } => "AUX-3002",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Memory exhaustion is not retryable: the next attempt hits the same ceiling.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Sql { .. } | Self::DirectoryUnavailable { .. }
        )
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

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for AuxError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for AuxError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for AuxError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
