use thiserror::Error;

/// Top-level error type for the ad-selection persistence module.
///
/// Each variant maps to one of the error classes callers are expected to
/// branch on. Subsystem crates convert their own failures into this type so
/// that the `?` operator works seamlessly across crate boundaries.
///
/// Absence is never an error: lookups for unknown ids return `None` or an
/// empty collection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdSelectError {
    /// A malformed entity was rejected before reaching storage: missing
    /// required field or a contradictory field combination.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The storage layer rejected the write: foreign-key or uniqueness
    /// violation. Callers use this to distinguish "already exists" from
    /// other failures.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// An execution logger was driven out of its declared stage order.
    /// Fatal to the logger instance; never retried.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for AdSelectError {
    fn from(err: toml::de::Error) -> Self {
        AdSelectError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AdSelectError {
    fn from(err: toml::ser::Error) -> Self {
        AdSelectError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AdSelectError {
    fn from(err: serde_json::Error) -> Self {
        AdSelectError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for ad-selection operations.
pub type Result<T> = std::result::Result<T, AdSelectError>;
