//! Error types for secagg-fl

use thiserror::Error;

/// All possible errors in secagg-fl
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecAggError {
    /// Fixed-point or server configuration is unusable (e.g. modulus `Q <= 1`)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A round lifecycle method was called out of sequence
    #[error("Illegal round state: {operation} requires an active round")]
    IllegalState {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// An argument was outside its valid domain (e.g. non-positive weight)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown parameter name or shape mismatch against the fixed parameter set
    #[error("Schema mismatch for parameter '{name}': {reason}")]
    SchemaMismatch {
        /// Offending parameter name
        name: String,
        /// What did not match
        reason: String,
    },

    /// Round finalization attempted without its preconditions
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Array shape error
    #[error("Array shape error: {0}")]
    ShapeError(String),
}

impl SecAggError {
    pub(crate) fn unknown_parameter(name: &str) -> Self {
        SecAggError::SchemaMismatch {
            name: name.to_string(),
            reason: "unknown parameter".to_string(),
        }
    }

    pub(crate) fn shape_mismatch(name: &str, expected: &[usize], actual: &[usize]) -> Self {
        SecAggError::SchemaMismatch {
            name: name.to_string(),
            reason: format!("expected shape {:?}, got {:?}", expected, actual),
        }
    }
}

impl From<ndarray::ShapeError> for SecAggError {
    fn from(e: ndarray::ShapeError) -> Self {
        SecAggError::ShapeError(e.to_string())
    }
}
