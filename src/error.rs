//! Error types for Autoflow.
//!
//! All errors crossing the public API are represented by the `FlowError` enum.
//! Failures that are part of normal run progress (template warnings, condition
//! type mismatches, dispatch failures) are typed locally and recorded on step
//! records instead of being raised.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Autoflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Engine-level errors (startup, shutdown, scheduling).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML, etc.).
    #[error("{0}")]
    Convert(String),

    /// A graph failed publish-time validation.
    #[error("validation failed: {reason}")]
    Validation {
        reason: String,
        node_id: Option<String>,
    },

    /// The requested record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A concurrent writer won, or the operation is not allowed in the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Run lifecycle errors.
    #[error("{0}")]
    Run(String),

    /// Storage operation errors.
    #[error("{0}")]
    Store(String),

    /// Workflow definition errors.
    #[error("{0}")]
    Workflow(String),

    /// Node definition errors.
    #[error("{0}")]
    Node(String),

    /// Edge definition errors.
    #[error("{0}")]
    Edge(String),

    /// Action dispatch errors.
    #[error("{0}")]
    Action(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl FlowError {
    /// Shorthand for a validation error attached to a node.
    pub fn validation(
        reason: impl Into<String>,
        node_id: Option<&str>,
    ) -> Self {
        FlowError::Validation {
            reason: reason.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    /// Infrastructure failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::Store(_) | FlowError::IoError(_))
    }

    /// The offending node of a validation error, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowError::Validation {
                node_id,
                ..
            } => node_id.as_deref(),
            _ => None,
        }
    }
}

impl From<FlowError> for String {
    fn from(val: FlowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for FlowError {
    fn from(error: std::io::Error) -> Self {
        FlowError::IoError(error.to_string())
    }
}

impl From<FlowError> for std::io::Error {
    fn from(val: FlowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for FlowError {
    fn from(_: FromUtf8Error) -> Self {
        FlowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        FlowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(error: toml::de::Error) -> Self {
        FlowError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for FlowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        FlowError::Node(error.to_string())
    }
}
