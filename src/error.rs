//! Error types for the waste classifier.
//!
//! This module defines the errors that can occur while turning an image into a
//! classification: reaching a remote backend, decoding its response, loading an
//! in-process model, and the safety rejection raised when a backend answers
//! without a usable label.
//!
//! The main error type is `ClassifierError`. The controller never lets one of
//! these escape to its caller; it converts them into a failed state instead.

use thiserror::Error;

/// Message shown to the user when a backend answered without a usable label.
pub const SAFETY_MESSAGE: &str = "Please upload a recyclable material image only.";

/// Message shown to the user for every other failed classification.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to classify image. Please try again.";

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Represents all possible errors that can occur while classifying an image.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Indicates a failure reaching a remote provider.
    ///
    /// This error occurs when:
    /// - The connection cannot be established
    /// - The request exceeds its time budget
    /// - The server answers with a non-2xx status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Indicates that a provider answered, but not in the shape it promised.
    ///
    /// This error occurs when:
    /// - A REST response array has fewer than two elements
    /// - The label field is missing
    /// - The confidence is not a number within [0, 1]
    /// - A model output does not line up with its label list
    #[error("Invalid response shape: {0}")]
    InvalidResponseShape(String),

    /// Indicates that the in-process model or its metadata could not be loaded.
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    /// The provider returned successfully but without a usable label.
    #[error("Safety rejection: provider returned no usable label")]
    SafetyRejection,

    /// Indicates that the image handed to the classifier is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Indicates that an invalid operation was attempted.
    ///
    /// This error occurs when:
    /// - A classification is submitted while another one is in flight
    /// - A provider variant is requested that was not compiled in
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Indicates missing or malformed provider configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClassifierError {
    /// The single message a user should see for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClassifierError::SafetyRejection => SAFETY_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassifierError::Transport(format!("request timed out: {err}"))
        } else if let Some(status) = err.status() {
            ClassifierError::Transport(format!("server answered {status}"))
        } else {
            ClassifierError::Transport(err.to_string())
        }
    }
}
