//! Error types for the marshalling layer
//!
//! `Error` is what every public operation returns. `MarshalError` covers a
//! single decode/encode step and is wrapped by `Error::Marshal`.

use crate::loader::LoadError;
use crate::value::Value;
use livetypes_config::ConfigError;
use thiserror::Error;

/// Result type for marshalling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by registry, pointer, layout, callback and binding operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown field '{field}' in {layout}")]
    UnknownField { layout: String, field: String },

    #[error("Failed to allocate {0} bytes")]
    AllocationFailure(usize),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid calling convention: {0}")]
    InvalidConvention(String),

    #[error("Native stub error: {0}")]
    Stub(String),

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a single decode or encode step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    /// Value variant not accepted by the target type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Integer does not fit the target width
    #[error("Value {value} out of range for {target}")]
    OutOfRange { value: String, target: String },

    /// Text could not be converted (interior NUL, bad encoding)
    #[error("Invalid text: {0}")]
    InvalidText(String),

    #[error("Null pointer")]
    NullPointer,
}

impl MarshalError {
    pub(crate) fn mismatch(expected: &str, got: &Value) -> Self {
        MarshalError::TypeMismatch {
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }

    pub(crate) fn out_of_range(value: impl ToString, target: &str) -> Self {
        MarshalError::OutOfRange {
            value: value.to_string(),
            target: target.to_string(),
        }
    }
}
