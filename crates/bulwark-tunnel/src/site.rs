//! Remote sites and the tunnel abstraction

use async_trait::async_trait;

use crate::error::TunnelError;

/// A cluster reachable through the tunnel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSite {
    /// Cluster name, unique within the tunnel
    pub name: String,
    /// Version reported by the site's agent
    pub version: String,
    /// Whether the site's tunnel is currently up
    pub connected: bool,
}

impl RemoteSite {
    /// A connected site
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            connected: true,
        }
    }
}

/// Multi-cluster tunnel that can enumerate and look up remote sites
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Sites currently reachable
    async fn list_sites(&self) -> Result<Vec<RemoteSite>, TunnelError>;

    /// Look up a site by name
    async fn get_site(&self, name: &str) -> Result<RemoteSite, TunnelError>;
}
