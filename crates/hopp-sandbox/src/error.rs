//! Error types for the Hoppscotch sandbox.

use hopp_error::ScriptErrorKind;
use thiserror::Error;

/// Errors that terminate a sandbox run.
///
/// Anything the script can catch (`BodyConsumedError`, `FetchError`,
/// `JSONError`) or record (failed assertions) never becomes a `SandboxError`.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The script failed to parse.
    #[error("script syntax error: {message}")]
    Syntax {
        /// Parser diagnostic.
        message: String,
    },

    /// The script threw before reaching its first suspension point.
    #[error("script runtime error: {message}")]
    Runtime {
        /// The thrown value, stringified.
        message: String,
    },

    /// A rejection escaped every script-level handler.
    #[error("unhandled async error: {message}")]
    AsyncRejection {
        /// The rejection reason, stringified.
        message: String,
    },

    /// All host operations drained but the script never settled.
    #[error("script did not settle: every host operation finished but the script is still awaiting a promise that nothing can resolve")]
    Unsettled,

    /// Script exceeds the configured maximum size.
    #[error("script exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Script nests brackets deeper than the parser is allowed to recurse.
    #[error("script nesting depth {actual} exceeds maximum {max}")]
    NestingTooDeep {
        /// Maximum allowed depth.
        max: usize,
        /// Detected depth.
        actual: usize,
    },

    /// The optional run deadline elapsed.
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// V8 heap memory limit was exceeded.
    #[error("V8 heap limit exceeded")]
    HeapLimitExceeded,

    /// Too many concurrent sandbox runs.
    #[error("concurrency limit reached (max {max} concurrent runs)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent runs.
        max: usize,
    },

    /// A value could not cross the VM boundary.
    #[error("marshalling failed: {0}")]
    Marshal(String),

    /// Run state was missing when results were captured.
    #[error("result capture failed: {0}")]
    Capture(String),

    /// Generic host failure.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// Host-side serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Classify this error for callers that need to branch on it.
    pub fn kind(&self) -> ScriptErrorKind {
        match self {
            Self::Syntax { .. } => ScriptErrorKind::Syntax,
            Self::Runtime { .. } => ScriptErrorKind::Runtime,
            Self::AsyncRejection { .. } => ScriptErrorKind::AsyncRejection,
            Self::Unsettled => ScriptErrorKind::Unsettled,
            Self::CodeTooLarge { .. }
            | Self::NestingTooDeep { .. }
            | Self::Timeout { .. }
            | Self::HeapLimitExceeded
            | Self::ConcurrencyLimit { .. } => ScriptErrorKind::ResourceLimit,
            Self::Marshal(_) | Self::Capture(_) | Self::Execution(_) | Self::Serialization(_) => {
                ScriptErrorKind::Internal
            }
        }
    }

    /// Convert to the `{ kind, message }` shape returned to callers.
    pub fn to_structured(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}
