#![warn(missing_docs)]

//! Typed error vocabulary shared by the Hoppscotch sandbox crates.
//!
//! - [`FetchError`] is what an injected fetch transport reports back to the
//!   sandbox. It is surfaced to scripts as a catchable `FetchError`.
//! - [`ScriptErrorKind`] classifies why a whole run failed, so callers can
//!   tell a syntax error apart from an async rejection without parsing text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error type for the injected `performFetch` capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The request could not be built (bad URL, bad method, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The transport did not produce a response in time.
    #[error("request to '{url}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// No transport is registered for the requested URL.
    #[error("no fetch route for '{0}'")]
    NoRoute(String),

    /// The transport itself (interceptor, proxy, extension) rejected the request.
    #[error("upstream error from '{source_name}': {message}")]
    Upstream {
        /// Name of the transport that failed.
        source_name: String,
        /// The error message reported by the transport.
        message: String,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FetchError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Network(_) => "NETWORK",
            Self::Timeout { .. } => "TIMEOUT",
            Self::NoRoute(_) => "NO_ROUTE",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the request may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Timeout { .. } => true,
            Self::Upstream { .. } => true,
            Self::InvalidRequest(_) => false,
            Self::NoRoute(_) => false,
            Self::Internal(_) => false,
        }
    }
}

/// Why a sandbox run failed as a whole.
///
/// Recoverable script-level errors (`BodyConsumedError`, `FetchError`,
/// `JSONError`, failed assertions) never reach this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptErrorKind {
    /// The script failed to parse.
    Syntax,
    /// The script threw during its synchronous part.
    Runtime,
    /// A promise rejection escaped all script-level handlers.
    AsyncRejection,
    /// All host work drained but the script never settled.
    Unsettled,
    /// The run exceeded a resource limit (size, heap, deadline, concurrency).
    ResourceLimit,
    /// The host failed (runtime creation, marshalling, capture).
    Internal,
}

impl ScriptErrorKind {
    /// Returns the stable string form used in structured errors and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
            Self::AsyncRejection => "async_rejection",
            Self::Unsettled => "unsettled",
            Self::ResourceLimit => "resource_limit",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// FetchError crosses thread boundaries between the transport and the sandbox thread.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<FetchError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_request() {
        let err = FetchError::InvalidRequest("relative URL without a base".into());
        assert_eq!(
            err.to_string(),
            "invalid request: relative URL without a base"
        );
    }

    #[test]
    fn display_timeout() {
        let err = FetchError::Timeout {
            url: "https://echo.hoppscotch.io".into(),
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "request to 'https://echo.hoppscotch.io' timed out after 5000ms"
        );
    }

    #[test]
    fn display_upstream() {
        let err = FetchError::Upstream {
            source_name: "proxy".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "upstream error from 'proxy': connection refused"
        );
    }

    #[test]
    fn display_internal_is_transparent() {
        let err = FetchError::Internal(anyhow::anyhow!("something broke"));
        assert_eq!(err.to_string(), "something broke");
    }

    #[test]
    fn code_exhaustive() {
        let cases: Vec<(FetchError, &str)> = vec![
            (FetchError::InvalidRequest("x".into()), "INVALID_REQUEST"),
            (FetchError::Network("x".into()), "NETWORK"),
            (
                FetchError::Timeout {
                    url: "u".into(),
                    timeout_ms: 1,
                },
                "TIMEOUT",
            ),
            (FetchError::NoRoute("u".into()), "NO_ROUTE"),
            (
                FetchError::Upstream {
                    source_name: "s".into(),
                    message: "m".into(),
                },
                "UPSTREAM_ERROR",
            ),
            (FetchError::Internal(anyhow::anyhow!("x")), "INTERNAL"),
        ];
        for (err, expected) in &cases {
            assert_eq!(err.code(), *expected, "wrong code for {err}");
        }
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(FetchError::Network("reset".into()).retryable());
        assert!(FetchError::Timeout {
            url: "u".into(),
            timeout_ms: 10
        }
        .retryable());
        assert!(!FetchError::InvalidRequest("bad".into()).retryable());
        assert!(!FetchError::NoRoute("u".into()).retryable());
    }

    #[test]
    fn script_error_kind_serializes_snake_case() {
        let json = serde_json::to_value(ScriptErrorKind::AsyncRejection).unwrap();
        assert_eq!(json, "async_rejection");
        assert_eq!(ScriptErrorKind::Syntax.to_string(), "syntax");
    }
}
