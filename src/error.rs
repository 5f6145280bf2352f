//! Error types for the plugin host.

use std::time::Duration;

use thiserror::Error;

use crate::value::CheckFailure;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle violation kinds for [`Error::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// An operation was attempted before `configure()` (or `setup()`), or
    /// after teardown.
    NotConfigured,
    /// `configure()` was called on a session that is already configured.
    AlreadyConfigured,
}

impl std::fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not configured"),
            Self::AlreadyConfigured => write!(f, "already configured"),
        }
    }
}

/// Errors that can occur while hosting provider plugins.
#[derive(Debug, Error)]
pub enum Error {
    /// A URN string matched neither the full nor the short pattern.
    #[error("Invalid URN value: {0:?}")]
    InvalidUrn(String),

    /// An operation was attempted against a context or provider outside its
    /// valid lifecycle state. Programmer error, never retried.
    #[error("Session error ({kind}): {message}")]
    Session {
        /// Which lifecycle rule was violated.
        kind: SessionErrorKind,
        /// Human-readable description of the violation.
        message: String,
    },

    /// `invoke()` argument validation failed.
    #[error("Invocation of '{member}' failed validation ({} failure(s))", failures.len())]
    InvocationValidation {
        /// The provider function that was invoked.
        member: String,
        /// The structured validation failures reported by the plugin.
        failures: Vec<CheckFailure>,
    },

    /// A plugin-reported failure (schema fetch, generic invoke failure,
    /// process-level fault). Carries the provider-assigned numeric code.
    #[error("Provider error (code {code}): {message}")]
    Provider {
        /// Provider-defined numeric error code.
        code: i64,
        /// Description reported by the plugin.
        message: String,
    },

    /// A create/update/delete call exceeded its timeout bound.
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        /// The operation that was cut off.
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Plugin installation, download, or verification failed.
    #[error("Plugin install failed: {0}")]
    PluginInstall(String),

    /// The plugin does not support the requested schema version.
    #[error("Schema version {version} not supported: {message}")]
    Schema {
        /// The schema version that was requested.
        version: u32,
        /// Description reported by the plugin.
        message: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::Session`] with kind [`SessionErrorKind::NotConfigured`].
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::Session {
            kind: SessionErrorKind::NotConfigured,
            message: message.into(),
        }
    }

    /// Build a [`Error::Session`] with kind [`SessionErrorKind::AlreadyConfigured`].
    pub fn already_configured(message: impl Into<String>) -> Self {
        Self::Session {
            kind: SessionErrorKind::AlreadyConfigured,
            message: message.into(),
        }
    }

    /// The session-error kind, if this is a lifecycle violation.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            Self::Session { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
