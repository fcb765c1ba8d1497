use thiserror::Error;

use crate::scrub::controller::ScrubOutcome;

pub type Result<T> = std::result::Result<T, ScrubError>;

/// Rejected configuration value. Raised before any computation starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown {kind} '{value}'; expected one of: {}", allowed.join(", "))]
    Unknown {
        kind: &'static str,
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn unknown(kind: &'static str, value: &str, allowed: &[&'static str]) -> Self {
        ConfigError::Unknown {
            kind,
            value: value.to_string(),
            allowed: allowed.to_vec(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}

/// Failure while reading or assembling a dataset.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("image '{path}': {message}")]
    Image { path: String, message: String },

    #[error("index {index} is outside the dataset (size {size})")]
    IndexOutOfRange { index: usize, size: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Numerical failure inside one perturbation pass. The controller treats it as
/// a reverted round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PerturbError {
    #[error("forget batch is empty")]
    EmptyBatch,

    #[error("non-finite {what} ({value})")]
    NonFinite { what: &'static str, value: f64 },

    #[error("hessian stayed singular after damping up to {damping:e}")]
    Singular { damping: f64 },

    #[error("no parameters selected for the update")]
    EmptySelection,
}

#[derive(Debug, Error)]
pub enum ScrubError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact '{path}': {message}")]
    Artifact { path: String, message: String },

    /// `partial` holds the run up to the last failed round; its model is the
    /// last accepted one.
    #[error("{count} consecutive perturbation failures; last: {last}")]
    TooManyFailures {
        count: usize,
        last: PerturbError,
        partial: Box<ScrubOutcome>,
    },
}

impl ScrubError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        ScrubError::Io { path: path.as_ref().display().to_string(), source }
    }
}
