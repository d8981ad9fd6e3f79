//! Error types for opgraph-scope

use std::fmt;
use thiserror::Error;

/// Scope error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Variable name not present in the scope chain
    VariableNotFound,
    /// Variable name already taken in this scope
    VariableExists,
    /// Tensor shape and data disagree
    InvalidValue,
    /// Serialization/deserialization errors
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::VariableNotFound => "variable_not_found",
            ErrorKind::VariableExists => "variable_exists",
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scope error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct ScopeError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ScopeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn variable_not_found(name: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::VariableNotFound,
            format!("Variable not found: {}", name.into()),
        )
    }

    pub fn variable_exists(name: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::VariableExists,
            format!("Variable already exists: {}", name.into()),
        )
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidValue, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }
}

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        ScopeError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ScopeError>;
