//! Why a monitored connection was terminated

use std::fmt;
use std::time::Duration;

use bulwark_common::crd::LockTarget;
use bulwark_lock::LockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cause attached to a terminated connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// A lock selecting the connection's principal is in force
    LockInForce {
        /// Lock resource name
        name: String,
        /// Target selector of the lock
        target: LockTarget,
        /// Message attached to the lock
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The lock view went stale under strict locking
    StaleLockView,
    /// The client certificate expired
    CertExpired {
        /// Effective certificate expiry
        expires: DateTime<Utc>,
    },
    /// The client sent nothing for longer than the idle timeout
    IdleTimeout {
        /// Idle timeout in effect
        #[serde(with = "secs")]
        timeout: Duration,
    },
    /// The connection was closed by its owner
    Closed,
}

impl DisconnectReason {
    /// Whether the connection lost its authorization, as opposed to timing out
    /// or being closed
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::LockInForce { .. } | Self::StaleLockView)
    }

    /// Whether the termination should produce a disconnect record
    pub fn is_audited(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Name of the lock in force, if any
    pub fn lock_name(&self) -> Option<&str> {
        match self {
            Self::LockInForce { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockInForce {
                name,
                target,
                message,
            } => {
                let err = LockError::LockInForce {
                    name: name.clone(),
                    target: target.clone(),
                    message: message.clone(),
                };
                write!(f, "{}", err)
            }
            Self::StaleLockView => write!(f, "preventive lock-out: {}", LockError::StaleLockView),
            Self::CertExpired { expires } => {
                write!(f, "client certificate expired at {}", expires.to_rfc3339())
            }
            Self::IdleTimeout { timeout } => write!(
                f,
                "client reported no activity in the last {}s",
                timeout.as_secs()
            ),
            Self::Closed => f.write_str("connection closed"),
        }
    }
}

impl From<LockError> for DisconnectReason {
    fn from(err: LockError) -> Self {
        match err {
            LockError::LockInForce {
                name,
                target,
                message,
            } => Self::LockInForce {
                name,
                target,
                message,
            },
            LockError::StaleLockView => Self::StaleLockView,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
