//! Error types for the scheme engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LbmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("polynomial basis of scheme {scheme} gives a singular moment matrix")]
    SingularBasis { scheme: usize },

    #[error("no boundary method registered for label {label} (scheme {scheme})")]
    UnlabeledBoundary { label: i32, scheme: usize },

    #[error("dimension mismatch: domain is {domain}-D, scheme is {scheme}-D")]
    DimensionMismatch { domain: usize, scheme: usize },

    #[error("velocity index {index} is not defined in dimension {dim}")]
    UndefinedVelocity { index: usize, dim: usize },

    #[error("unbound symbol: {0}")]
    UnboundSymbol(String),

    #[error("halo message has {got} values, expected {expected}")]
    HaloMismatch { expected: usize, got: usize },

    #[error("halo channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LbmError {
    pub fn config(msg: impl Into<String>) -> Self {
        LbmError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LbmError>;
