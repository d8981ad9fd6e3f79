use crate::config::ConfigError;
use crate::ids::InstrId;
use opgraph_scope::{ErrorKind as ScopeErrorKind, ScopeError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    /// Invalid id, missing required reference or malformed instruction.
    /// Always a compile-time bug; never retried.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A work unit failed; the whole invocation was aborted
    #[error("Instruction {instruction} ({op_type}) failed: {reason}")]
    RuntimeFailure {
        instruction: InstrId,
        op_type: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] ScopeError),
}

impl ExecError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionViolation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn runtime(
        instruction: InstrId,
        op_type: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::RuntimeFailure {
            instruction,
            op_type: op_type.into(),
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecError::NotFound(_) => ErrorCategory::Recoverable,
            ExecError::Store(e) if e.kind == ScopeErrorKind::VariableNotFound => {
                ErrorCategory::Recoverable
            }
            _ => ErrorCategory::Fatal,
        }
    }

    /// Originating instruction of a runtime failure
    pub fn instruction(&self) -> Option<InstrId> {
        match self {
            ExecError::RuntimeFailure { instruction, .. } => Some(*instruction),
            _ => None,
        }
    }
}

/// Error category for callers deciding whether to continue
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// The caller may handle it and carry on (e.g. a missing name)
    Recoverable,
    /// Compile-time bug or aborted invocation; start over
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Recoverable => "recoverable",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
