use thiserror::Error;

/// Errors raised while building or tuning a controller.
///
/// The per-tick `step` never produces one of these; numerical trouble inside
/// the control loop is absorbed by clamping and flooring.
#[derive(Error, Debug)]
pub enum MfcError {
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Parameter {0} is read-only")]
    ReadOnlyParameter(String),

    #[error("Invalid value {value} for parameter {name}")]
    InvalidValue { name: String, value: f64 },

    #[error("Plant integration failed over [{start}, {end}] s")]
    Integration { start: f64, end: f64 },

    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl MfcError {
    pub(crate) fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        MfcError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for controller construction and tuning
pub type MfcResult<T> = Result<T, MfcError>;
