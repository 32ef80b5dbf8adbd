//! Error types for the Cirrus engine.

use crate::{ClassName, LocalId};
use thiserror::Error;

/// All possible errors from the Cirrus engine.
///
/// Every variant is a local contract violation: it is reported synchronously
/// and retrying the same call cannot succeed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Value errors
    #[error("unsupported native type: {0}")]
    UnsupportedNativeType(String),

    #[error("invalid geo point: latitude {latitude}, longitude {longitude}")]
    InvalidGeoPoint { latitude: f64, longitude: f64 },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Operation errors
    #[error("incompatible operation on '{key}': {reason}")]
    IncompatibleOperation { key: String, reason: String },

    #[error("reserved key: {0}")]
    ReservedKey(String),

    #[error("unknown field '{field}' for class {class_name}")]
    UnknownField { class_name: ClassName, field: String },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("unknown save generation: {0}")]
    UnknownGeneration(u64),

    // Graph errors
    #[error("cyclic reference among unsaved objects: {}", .0.join(" -> "))]
    CyclicUnsavedReference(Vec<ClassName>),

    #[error("reference to unsaved {0} object has no identifier")]
    UnsavedReference(ClassName),

    #[error("reference to object {0} that is no longer alive")]
    DanglingReference(LocalId),

    // Query errors
    #[error("cannot combine queries on class {left} and {right}")]
    IncompatibleQueryClass { left: ClassName, right: ClassName },
}

impl Error {
    pub(crate) fn incompatible(key: &str, reason: impl Into<String>) -> Self {
        Error::IncompatibleOperation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::UnsupportedNativeType(msg.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnsupportedNativeType("NaN".into());
        assert_eq!(err.to_string(), "unsupported native type: NaN");

        let err = Error::IncompatibleQueryClass {
            left: "Person".into(),
            right: "Pet".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot combine queries on class Person and Pet"
        );

        let err = Error::CyclicUnsavedReference(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(
            err.to_string(),
            "cyclic reference among unsaved objects: A -> B -> A"
        );

        let err = Error::incompatible("count", "Increment needs a number");
        assert_eq!(
            err.to_string(),
            "incompatible operation on 'count': Increment needs a number"
        );
    }
}
