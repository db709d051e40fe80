//! Error types for tank attribute decoding

use thiserror::Error;

use crate::paths::TankPath;

/// Errors that can occur while decoding a single attribute
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value has the wrong type for its path
    #[error("{path}: expected {expected}, got {actual}")]
    WrongType {
        path: TankPath,
        expected: &'static str,
        actual: String,
    },

    /// Numeric value outside the representable range
    #[error("{path}: value out of range: {value}")]
    OutOfRange { path: TankPath, value: String },

    /// Path string not part of the tank attribute surface
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// Unit code not present in the lookup table
    #[error("unknown volume unit code: {0}")]
    UnknownUnit(i64),
}

impl CodecError {
    /// Path the error refers to, if any
    pub fn path(&self) -> Option<TankPath> {
        match self {
            Self::WrongType { path, .. } | Self::OutOfRange { path, .. } => Some(*path),
            Self::UnknownPath(_) | Self::UnknownUnit(_) => None,
        }
    }
}
