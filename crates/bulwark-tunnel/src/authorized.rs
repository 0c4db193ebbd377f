//! Access-filtered view of a tunnel
//!
//! Every remote site other than the local cluster is checked in two tiers:
//! its trust record must exist, then the caller's policy must allow it.
//! Enumeration skips sites that fail either tier; single lookups report both
//! as the same opaque denial so callers cannot probe which clusters exist.

use std::sync::Arc;

use async_trait::async_trait;
use bulwark_common::{AccessChecker, AccessError};
use tracing::{debug, warn};

use crate::error::TunnelError;
use crate::site::{RemoteSite, Tunnel};
use crate::store::ClusterGetter;

/// Tunnel filtered through a caller's access policy
pub struct AuthorizedTunnel {
    tunnel: Arc<dyn Tunnel>,
    local_cluster: String,
    checker: Arc<dyn AccessChecker>,
    clusters: Arc<dyn ClusterGetter>,
}

impl AuthorizedTunnel {
    /// Wrap `tunnel` for a caller whose policy is `checker`
    pub fn new(
        tunnel: Arc<dyn Tunnel>,
        local_cluster: impl Into<String>,
        checker: Arc<dyn AccessChecker>,
        clusters: Arc<dyn ClusterGetter>,
    ) -> Self {
        Self {
            tunnel,
            local_cluster: local_cluster.into(),
            checker,
            clusters,
        }
    }

    /// Name of the cluster that is never filtered
    pub fn local_cluster(&self) -> &str {
        &self.local_cluster
    }

    async fn check_site(&self, name: &str) -> Result<(), AccessError> {
        let cluster = self.clusters.get_remote_cluster(name).await?;
        self.checker.check_access_to_remote_cluster(&cluster)
    }
}

#[async_trait]
impl Tunnel for AuthorizedTunnel {
    async fn list_sites(&self) -> Result<Vec<RemoteSite>, TunnelError> {
        let sites = self.tunnel.list_sites().await?;
        let mut visible = Vec::with_capacity(sites.len());

        for site in sites {
            if site.name == self.local_cluster {
                visible.push(site);
                continue;
            }

            match self.check_site(&site.name).await {
                Ok(()) => visible.push(site),
                Err(e) if e.is_not_found() => {
                    warn!(
                        site = %site.name,
                        "Skipping dangling site, no remote cluster resource found"
                    );
                }
                Err(e) if e.is_access_denied() => {
                    debug!(site = %site.name, "Site hidden by access policy");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(visible)
    }

    async fn get_site(&self, name: &str) -> Result<RemoteSite, TunnelError> {
        let site = self.tunnel.get_site(name).await?;
        if site.name == self.local_cluster {
            return Ok(site);
        }

        self.check_site(name)
            .await
            .map_err(|e| TunnelError::Access(e.opaque()))?;
        Ok(site)
    }
}
