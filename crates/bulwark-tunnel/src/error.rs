//! Tunnel errors

use bulwark_common::AccessError;
use thiserror::Error;

/// Error from a tunnel or its authorization overlay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    /// The tunnel does not know the site
    #[error("remote site {0:?} not found")]
    SiteNotFound(String),

    /// Access decision or trust-record lookup failed
    #[error(transparent)]
    Access(#[from] AccessError),
}

impl TunnelError {
    /// Whether this is an access denial
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Access(e) if e.is_access_denied())
    }
}
