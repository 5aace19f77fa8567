//! Error types for Resflow.
//!
//! All errors are represented by the `ResflowError` enum. The first group of
//! variants is the execution taxonomy surfaced by handlers, the gate, the step
//! synchronizer and the tool loop; the rest are ambient failures.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Resflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum ResflowError {
    /// Malformed definition, e.g. a tool without a script or a graph with a cycle.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed payload field or unresolvable reference.
    #[error("decode error: {0}")]
    Decode(String),

    /// A wait or a level exceeded its deadline.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Handler-level failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// One or more tool calls failed or were malformed.
    #[error("tool error: {0}")]
    Tool(String),

    /// The tool loop hit its iteration ceiling with calls still pending.
    #[error("loop limit error: {0}")]
    LoopLimit(String),

    /// A level finished with failures. Wraps the first one.
    #[error("concurrent processing failed with {failed} errors: {source}")]
    Level {
        failed: usize,
        source: Box<ResflowError>,
    },

    /// Work was cancelled before it could finish.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors.
    #[error("{0}")]
    Convert(String),

    /// Embedded script errors (JavaScript, Python).
    #[error("{0}")]
    Script(String),

    /// Resource store errors.
    #[error("{0}")]
    Store(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Job queue errors.
    #[error("{0}")]
    Queue(String),
}

impl ResflowError {
    /// Joins several errors into one `Tool` error, one message per line.
    pub fn join_tool_errors(errors: Vec<ResflowError>) -> Option<ResflowError> {
        if errors.is_empty() {
            return None;
        }
        let message = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n");
        Some(ResflowError::Tool(message))
    }
}

impl From<ResflowError> for String {
    fn from(val: ResflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for ResflowError {
    fn from(error: std::io::Error) -> Self {
        ResflowError::IoError(error.to_string())
    }
}

impl From<ResflowError> for std::io::Error {
    fn from(val: ResflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for ResflowError {
    fn from(_: FromUtf8Error) -> Self {
        ResflowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for ResflowError {
    fn from(error: serde_json::Error) -> Self {
        ResflowError::Decode(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for ResflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        ResflowError::Validation(error.to_string())
    }
}

impl From<reqwest::Error> for ResflowError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ResflowError::Timeout(error.to_string())
        } else {
            ResflowError::Execution(error.to_string())
        }
    }
}

impl From<url::ParseError> for ResflowError {
    fn from(error: url::ParseError) -> Self {
        ResflowError::Decode(error.to_string())
    }
}
