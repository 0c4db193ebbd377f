//! Error types shared across bulwark components
//!
//! Access decisions distinguish three outcomes: the caller is denied, the
//! resource the decision needs does not exist, or the decision itself could
//! not be made. Enumerations skip the first two; only the third is fatal.

use thiserror::Error;

/// Message returned to callers that must not learn why access was refused
pub const OPAQUE_ACCESS_DENIED: &str = "access denied";

/// Error from an access decision or a resource lookup feeding one
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The principal is not permitted
    #[error("access denied: {0}")]
    Denied(String),

    /// The resource the decision depends on does not exist
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Resource kind (e.g. "remote cluster")
        kind: String,
        /// Resource name
        name: String,
    },

    /// The decision could not be evaluated
    #[error("access check failed [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the failure occurred (e.g. "checker", "store")
        context: String,
    },
}

impl AccessError {
    /// Create a denial with the given reason
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied(reason.into())
    }

    /// Create a not-found error for a named resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this is an access denial
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    /// Whether this is a missing resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Hide the reason behind a denial or a missing resource
    ///
    /// Callers without access must not be able to tell "forbidden" from
    /// "does not exist". Internal errors pass through unchanged.
    pub fn opaque(self) -> Self {
        match self {
            Self::Denied(_) | Self::NotFound { .. } => {
                Self::Denied(OPAQUE_ACCESS_DENIED.to_string())
            }
            other => other,
        }
    }
}
