//! Access-checker seam
//!
//! The RBAC engine lives outside this workspace. Components only need the
//! narrow set of decisions below, so they depend on this trait rather than on
//! any particular policy implementation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crd::RemoteCluster;
use crate::error::AccessError;

/// How to behave when the lock view cannot be confirmed fresh
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    /// Keep connections open while the lock view is stale
    #[default]
    BestEffort,
    /// Treat a stale lock view as a lock on everyone
    Strict,
}

impl LockingMode {
    /// Stable string form used in config and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestEffort => "best_effort",
            Self::Strict => "strict",
        }
    }
}

impl fmt::Display for LockingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" | "" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown locking mode: {}", other)),
        }
    }
}

/// Policy decisions consumed by the tunnel and the connection monitor
#[cfg_attr(test, mockall::automock)]
pub trait AccessChecker: Send + Sync {
    /// Check whether the principal may see a remote cluster
    ///
    /// Returns `AccessError::Denied` when the policy forbids it; any other
    /// error means the decision could not be made.
    fn check_access_to_remote_cluster(&self, cluster: &RemoteCluster) -> Result<(), AccessError>;

    /// Adjust the cluster-wide "disconnect on certificate expiry" setting
    fn adjust_disconnect_expired_cert(&self, disconnect: bool) -> bool;

    /// Adjust the cluster-wide client idle timeout (zero disables it)
    fn adjust_client_idle_timeout(&self, timeout: Duration) -> Duration;

    /// Effective locking mode given the cluster default
    fn locking_mode(&self, default: LockingMode) -> LockingMode;
}
