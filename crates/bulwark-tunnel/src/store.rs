//! Remote cluster trust records

use async_trait::async_trait;
use bulwark_common::crd::RemoteCluster;
use bulwark_common::AccessError;
use kube::{Api, Client};

/// Looks up remote cluster trust records by name
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterGetter: Send + Sync {
    /// Fetch the record, or `AccessError::NotFound` when none exists
    async fn get_remote_cluster(&self, name: &str) -> Result<RemoteCluster, AccessError>;
}

/// Trust records stored as `RemoteCluster` custom resources
#[derive(Clone)]
pub struct KubeClusterStore {
    api: Api<RemoteCluster>,
}

impl KubeClusterStore {
    /// Look up records through `client`
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ClusterGetter for KubeClusterStore {
    async fn get_remote_cluster(&self, name: &str) -> Result<RemoteCluster, AccessError> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| AccessError::internal("remote cluster store", e.to_string()))?
            .ok_or_else(|| AccessError::not_found("remote cluster", name))
    }
}
