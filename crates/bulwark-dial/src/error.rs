//! Dial errors
//!
//! A failed connect reports every strategy it tried. The causes are kept side
//! by side so operators can tell a broken direct path from a broken tunnel.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::dialer::DialStrategy;

/// Failure of a single transport leg
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connected, but the liveness probe failed
    #[error("liveness probe failed: {0}")]
    Ping(String),

    /// The leg did not finish within the dial timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The proxy's reverse-tunnel address could not be resolved
    #[error("failed to resolve reverse tunnel address: {0}")]
    Resolve(String),

    /// Credentials are missing or malformed
    #[error("invalid credentials: {0}")]
    Credentials(String),
}

/// Every leg that was attempted, in order, with its cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialFailure {
    /// Attempted strategies and why each failed
    pub failures: Vec<(DialStrategy, TransportError)>,
}

impl fmt::Display for DialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (strategy, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", strategy.failure_context(), err)?;
        }
        Ok(())
    }
}

/// Error returned by [`crate::ClusterDialer::connect`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// No candidate address was given
    #[error("no auth server addresses to dial")]
    NoAddresses,

    /// Every attempted strategy failed
    #[error("{0}")]
    Failed(DialFailure),
}

impl DialError {
    /// Cause recorded for `strategy`, if it was attempted
    pub fn cause(&self, strategy: DialStrategy) -> Option<&TransportError> {
        match self {
            Self::Failed(failure) => failure
                .failures
                .iter()
                .find(|(s, _)| *s == strategy)
                .map(|(_, e)| e),
            Self::NoAddresses => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_both_causes() {
        let err = DialError::Failed(DialFailure {
            failures: vec![
                (
                    DialStrategy::DirectTls,
                    TransportError::Connect("connection refused".into()),
                ),
                (
                    DialStrategy::TunneledSsh,
                    TransportError::Ping("certificate signed by unknown authority".into()),
                ),
            ],
        });

        assert_eq!(
            err.to_string(),
            "failed direct dial to auth server: connection failed: connection refused; \
             failed dial to auth server through reverse tunnel: liveness probe failed: \
             certificate signed by unknown authority"
        );
        assert_eq!(
            err.cause(DialStrategy::TunneledSsh),
            Some(&TransportError::Ping(
                "certificate signed by unknown authority".into()
            ))
        );
    }

    #[test]
    fn single_leg_failure() {
        let err = DialError::Failed(DialFailure {
            failures: vec![(
                DialStrategy::DirectTls,
                TransportError::Timeout(Duration::from_secs(5)),
            )],
        });
        assert_eq!(
            err.to_string(),
            "failed direct dial to auth server: timed out after 5s"
        );
        assert!(err.cause(DialStrategy::TunneledSsh).is_none());
    }
}
