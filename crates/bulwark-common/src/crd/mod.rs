//! Custom Resource Definitions for bulwark
//!
//! Locks and remote cluster trust records are stored as Kubernetes custom
//! resources so they can be watched and looked up with kube-rs.

mod lock;
mod remote_cluster;

pub use lock::{Lock, LockSpec, LockTarget};
pub use remote_cluster::{ConnectionState, RemoteCluster, RemoteClusterSpec, RemoteClusterStatus};
