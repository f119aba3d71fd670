//! Error types for the runner.

use thiserror::Error;

/// Failure of a single remote action or property read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("action {path} ended with status '{status}'")]
    ActionFailed { path: String, status: String },

    #[error("action {path} still unsettled after {polls} polls")]
    Timeout { path: String, polls: u32 },

    #[error("response from {path} has no '{field}'")]
    MissingField { path: String, field: String },
}

impl BridgeError {
    pub fn missing(path: impl Into<String>, field: impl Into<String>) -> Self {
        BridgeError::MissingField {
            path: path.into(),
            field: field.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler has shut down")]
    Closed,
}
