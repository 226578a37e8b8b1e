//! Error types for meterwatch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("value must exceed current reading: attempted {attempted}, current {current}")]
    InvalidReading { current: f64, attempted: f64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidReading { .. } => "INVALID_READING",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Other(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Domain errors are the caller's fault and carry no mutation.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidReading { .. } | Error::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
