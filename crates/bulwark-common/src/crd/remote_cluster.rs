//! RemoteCluster CRD for trusted cluster relationships
//!
//! A RemoteCluster records that this cluster trusts a leaf cluster reachable
//! through the reverse tunnel. Access policies evaluate its labels to decide
//! which identities may see the cluster.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RemoteCluster is the trust record for a cluster reachable through a tunnel.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bulwark.dev",
    version = "v1alpha1",
    kind = "RemoteCluster",
    status = "RemoteClusterStatus",
    printcolumn = r#"{"name":"Connection","type":"string","jsonPath":".status.connection"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterSpec {
    /// Public proxy address of the remote cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_address: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// RemoteCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterStatus {
    /// Tunnel connection state
    #[serde(default)]
    pub connection: ConnectionState,

    /// Last heartbeat received over the tunnel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Tunnel connection state of a remote cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConnectionState {
    /// Tunnel is up
    Online,
    /// Tunnel is down or has never connected
    #[default]
    Offline,
}
