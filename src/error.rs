//! Error types for churnserve.
//!
//! This module provides a unified error type [`ChurnError`] for all operations,
//! along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Features**: transformer state and record validation errors
//! - **Serving**: model slot and artifact loading errors
//! - **Registry**: version lookup and lifecycle transition errors
//! - **Training**: model type and dataset errors
//! - **Infrastructure**: storage, network, configuration and serialization
//!
//! # Propagation
//!
//! Artifact load failures are absorbed while building a
//! [`ModelManager`](crate::compute::ModelManager) so the service can start in
//! degraded mode. Every other error propagates to the caller; the HTTP layer
//! maps them to a status code with [`ChurnError::status_code`].
//!
//! ```rust
//! use churnserve::error::{ChurnError, Result};
//!
//! fn lookup(version: &str) -> Result<()> {
//!     Err(ChurnError::VersionNotFound(version.to_string()))
//! }
//!
//! let err = lookup("v1").unwrap_err();
//! assert_eq!(err.status_code(), 404);
//! ```

use std::io;
use thiserror::Error;

/// Main error type for churnserve operations.
#[derive(Error, Debug)]
pub enum ChurnError {
    // Feature transformer errors
    #[error("Feature transformer is not fitted")]
    NotFitted,

    #[error("Missing feature: {0}")]
    MissingFeature(String),

    #[error("Invalid feature {field}: expected {expected}")]
    InvalidFeature { field: String, expected: &'static str },

    /// Unseen categories encode to a zero block instead; kept so callers can
    /// match on the full taxonomy.
    #[error("Unknown category {value:?} for feature {field}")]
    UnknownCategory { field: String, value: String },

    // Serving errors
    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Failed to load artifact: {0}")]
    ArtifactLoad(String),

    // Registry errors
    #[error("Model version not found: {0}")]
    VersionNotFound(String),

    #[error("Invalid transition for {version}: {from} -> {to}")]
    InvalidTransition {
        version: String,
        from: String,
        to: String,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // Training errors
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    // Input errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChurnError {
    /// HTTP status code used by the API layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ChurnError::VersionNotFound(_) => 404,
            ChurnError::AlreadyExists(_) | ChurnError::InvalidTransition { .. } => 409,
            ChurnError::MissingFeature(_)
            | ChurnError::InvalidFeature { .. }
            | ChurnError::Validation(_)
            | ChurnError::InvalidArgument(_)
            | ChurnError::UnknownModelType(_) => 422,
            ChurnError::NoModelLoaded => 503,
            _ => 500,
        }
    }

    /// Check if error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChurnError::Network(_) | ChurnError::ArtifactLoad(_))
    }
}

impl From<serde_json::Error> for ChurnError {
    fn from(e: serde_json::Error) -> Self {
        ChurnError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for ChurnError {
    fn from(e: csv::Error) -> Self {
        ChurnError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ChurnError {
    fn from(e: reqwest::Error) -> Self {
        ChurnError::Network(e.to_string())
    }
}

/// Result type alias for churnserve operations.
pub type Result<T> = std::result::Result<T, ChurnError>;
