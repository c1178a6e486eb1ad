//! Error types for schedule-engine operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid recurrence pattern: {0}")]
    PatternSyntax(String),

    #[error("Invalid recurrence bound: {0}")]
    InvalidBound(String),

    #[error("Missing required attribute '{key}' (consulted: {})", consulted.join(" > "))]
    MissingRequiredAttribute { key: String, consulted: Vec<String> },

    #[error("Unknown venue alias '{alias}' (consulted: {})", consulted.join(" > "))]
    UnknownVenueAlias { alias: String, consulted: Vec<String> },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidAttribute { key: String, reason: String },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid datetime: {0}")]
    InvalidDateTime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
