//! Error types for Autoflow.
//!
//! All errors in Autoflow are represented by the `AutoflowError` enum,
//! which provides specific variants for different error categories.
//! A few variants are control signals rather than failures: the execution
//! loop matches on `ApprovalRequired` and `RunTimeout` explicitly.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Autoflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum AutoflowError {
    /// Engine-level errors (startup, shutdown, configuration).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML, etc.).
    #[error("{0}")]
    Convert(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),

    /// Storage operation errors.
    #[error("{0}")]
    Store(String),

    /// Run lifecycle errors.
    #[error("{0}")]
    Run(String),

    /// Workflow definition errors.
    #[error("{0}")]
    Workflow(String),

    /// Node definition or execution errors.
    #[error("{0}")]
    Node(String),

    /// Edge definition errors.
    #[error("{0}")]
    Edge(String),

    /// Action execution errors.
    #[error("{0}")]
    Action(String),

    /// Cron expression or timezone errors.
    #[error("{0}")]
    Cron(String),

    /// Schedule (trigger) errors.
    #[error("{0}")]
    Schedule(String),

    /// A node attempt exceeded its timeout.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The run exceeded its global wall-clock budget.
    #[error("run exceeded global timeout of {0}ms")]
    RunTimeout(u64),

    /// The node is an approval gate that has not been approved yet.
    #[error("approval required for node '{0}'")]
    ApprovalRequired(String),

    /// A node exhausted every attempt.
    #[error("{message} (after {attempts} attempt(s))")]
    Attempts {
        attempts: u32,
        message: String,
    },

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl AutoflowError {
    pub fn is_approval_required(&self) -> bool {
        matches!(self, AutoflowError::ApprovalRequired(_))
    }
}

impl From<AutoflowError> for String {
    fn from(val: AutoflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for AutoflowError {
    fn from(error: std::io::Error) -> Self {
        AutoflowError::IoError(error.to_string())
    }
}

impl From<AutoflowError> for std::io::Error {
    fn from(val: AutoflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for AutoflowError {
    fn from(_: FromUtf8Error) -> Self {
        AutoflowError::Runtime("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for AutoflowError {
    fn from(error: serde_json::Error) -> Self {
        AutoflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for AutoflowError {
    fn from(error: toml::de::Error) -> Self {
        AutoflowError::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_message_carries_count() {
        let err = AutoflowError::Attempts {
            attempts: 3,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "connection refused (after 3 attempt(s))");
    }

    #[test]
    fn test_approval_required_is_control_signal() {
        assert!(AutoflowError::ApprovalRequired("gate".into()).is_approval_required());
        assert!(!AutoflowError::Node("boom".into()).is_approval_required());
    }
}
