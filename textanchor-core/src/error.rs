//! Error types for the textanchor-core crate.

use thiserror::Error;

/// Error type returned by user-supplied callbacks (classifiers, language models).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = AnchorError> = std::result::Result<T, E>;

/// Top-level error type for anchor explanations.
#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("Predictor call failed: {message}")]
    PredictorCall {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Unexpected predictor output: {message}")]
    PredictorReturnType { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Invalid explain parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Sampler contract violated: expected {expected} {what}, got {got}")]
    SamplerContract {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Language model error: {message}")]
    LanguageModel {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AnchorError {
    pub fn predictor_call(message: impl Into<String>, source: BoxError) -> Self {
        Self::PredictorCall {
            message: message.into(),
            source,
        }
    }

    pub fn return_type(message: impl Into<String>) -> Self {
        Self::PredictorReturnType {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn language_model(message: impl Into<String>, source: BoxError) -> Self {
        Self::LanguageModel {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_predictor_call_keeps_cause() {
        let cause: BoxError = "connection refused".into();
        let err = AnchorError::predictor_call("probe failed", cause);
        assert_eq!(err.to_string(), "Predictor call failed: probe failed");
        let source = err.source().expect("cause is attached");
        assert_eq!(source.to_string(), "connection refused");
    }

    #[test]
    fn test_sampler_contract_message() {
        let err = AnchorError::SamplerContract {
            what: "mask rows",
            expected: 10,
            got: 9,
        };
        assert_eq!(
            err.to_string(),
            "Sampler contract violated: expected 10 mask rows, got 9"
        );
    }
}
