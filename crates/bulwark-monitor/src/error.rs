//! Monitor errors

use thiserror::Error;

/// Error attaching a monitor to a connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The monitor configuration cannot be used
    #[error("invalid monitor config: {0}")]
    InvalidConfig(String),
}

impl MonitorError {
    /// Create an invalid-config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            MonitorError::invalid_config("check interval must be positive").to_string(),
            "invalid monitor config: check interval must be positive"
        );
    }
}
