use std::fmt;

use crate::runtime::UnwarrantedOptimism;
use crate::security::Permission;

/// Script-visible error categories raised by the dynamic linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    TypeError,
    ReferenceError,
    RangeError,
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptErrorKind::TypeError => "TypeError",
            ScriptErrorKind::ReferenceError => "ReferenceError",
            ScriptErrorKind::RangeError => "RangeError",
        };
        f.write_str(name)
    }
}

/// Errors produced by generated units, the adapter generator and the sandbox loader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A speculative type assumption failed. Expected and recoverable by the caller.
    #[error("{0}")]
    UnwarrantedOptimism(UnwarrantedOptimism),

    /// Symbol resolution rejected by the ambient package-access policy.
    #[error("access denied: {symbol} (package '{package}')")]
    AccessDenied { symbol: String, package: String },

    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// A loading context was asked to define something other than its one class.
    #[error("inconsistent definition: {0}")]
    InconsistentDefinition(String),

    #[error("malformed adapter class: {0}")]
    MalformedClass(String),

    #[error("operation requires privilege {0}")]
    Privilege(Permission),

    #[error("{kind}: {message}")]
    Script { kind: ScriptErrorKind, message: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Internal consistency violation. Never expected in a correct engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn type_error(message: impl Into<String>) -> Self {
        EngineError::Script {
            kind: ScriptErrorKind::TypeError,
            message: message.into(),
        }
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        EngineError::Script {
            kind: ScriptErrorKind::ReferenceError,
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        EngineError::Script {
            kind: ScriptErrorKind::RangeError,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into())
    }

    pub fn as_optimism(&self) -> Option<&UnwarrantedOptimism> {
        match self {
            EngineError::UnwarrantedOptimism(u) => Some(u),
            _ => None,
        }
    }

    #[inline]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, EngineError::AccessDenied { .. })
    }
}

impl From<UnwarrantedOptimism> for EngineError {
    fn from(value: UnwarrantedOptimism) -> Self {
        EngineError::UnwarrantedOptimism(value)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
