//! Error types for the detection core.
//!
//! Every failure that can cross the ABI maps to exactly one symbolic
//! code; hosts switch on the code, the message is for humans.

use thiserror::Error;

/// Result type for detector operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// Errors that can occur during model loading or detection.
#[derive(Debug, Error)]
pub enum DetectError {
    /// A detect or set call arrived before a successful init
    #[error("detector is not initialized")]
    NotInitialized,

    /// On-disk image decode failed
    #[error("failed to load image: {0}")]
    ImageLoad(String),

    /// Model could not be read or its graph shape is unsupported
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Graph execution raised
    #[error("inference failed: {0}")]
    Runtime(String),

    /// Color conversion or resize failed
    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    /// Caller handed us something unusable (dimensions, strides, pointers)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DetectError {
    /// Symbolic tag for the wire record.
    pub fn code(&self) -> &'static str {
        match self {
            DetectError::NotInitialized => "NOT_INITIALIZED",
            DetectError::ImageLoad(_) => "IMAGE_LOAD_FAILED",
            DetectError::ModelLoad(_) | DetectError::Runtime(_) => "RUNTIME_ERROR",
            DetectError::Preprocess(_) | DetectError::InvalidInput(_) => "PREPROCESS_ERROR",
        }
    }
}

/// Code reserved for the host-side guard against a null record pointer.
/// The core never emits it; it is part of the shared vocabulary so hosts
/// and core agree on the full set of tags.
pub const CODE_NULL_RESULT: &str = "NULL_RESULT";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DetectError::NotInitialized.code(), "NOT_INITIALIZED");
        assert_eq!(
            DetectError::ImageLoad("nope".into()).code(),
            "IMAGE_LOAD_FAILED"
        );
        assert_eq!(DetectError::Runtime("x".into()).code(), "RUNTIME_ERROR");
        assert_eq!(DetectError::ModelLoad("x".into()).code(), "RUNTIME_ERROR");
        assert_eq!(
            DetectError::Preprocess("x".into()).code(),
            "PREPROCESS_ERROR"
        );
    }

    #[test]
    fn test_not_initialized_message_mentions_state() {
        let msg = DetectError::NotInitialized.to_string();
        assert!(msg.contains("not initialized"));
    }
}
