//! Lock errors

use bulwark_common::crd::LockTarget;
use thiserror::Error;

/// Reason a principal is locked out
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// A lock selecting one of the principal's targets is in force
    #[error("lock {name:?} targeting {target} is in force{}", suffix(.message))]
    LockInForce {
        /// Lock resource name
        name: String,
        /// Target selector of the lock
        target: LockTarget,
        /// Message attached to the lock
        message: Option<String>,
    },

    /// The lock view cannot be confirmed fresh and the locking mode is strict
    #[error("lock view is stale and locking mode is strict")]
    StaleLockView,
}

impl LockError {
    /// Name of the lock in force, if any
    pub fn lock_name(&self) -> Option<&str> {
        match self {
            Self::LockInForce { name, .. } => Some(name),
            Self::StaleLockView => None,
        }
    }
}

fn suffix(message: &Option<String>) -> String {
    match message.as_deref() {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

/// Error from a lock event source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The backend refused or could not open a watch
    #[error("lock watch unavailable: {0}")]
    Unavailable(String),

    /// An open watch failed
    #[error("lock watch failed: {0}")]
    Stream(String),
}
