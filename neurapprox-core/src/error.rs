//! Error types for the neurapprox-core crate.

use thiserror::Error;

/// Top-level error type for approximation engine operations.
#[derive(Debug, Error)]
pub enum ApproxError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    #[error("Type mismatch: expected backend '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Network not prepared: {0}")]
    NotPrepared(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration load error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl ApproxError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        Self::EmptyInput(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::DataConsistency(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn not_prepared(msg: impl Into<String>) -> Self {
        Self::NotPrepared(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ApproxError> = std::result::Result<T, E>;
