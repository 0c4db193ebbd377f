//! Remote site registry
//!
//! Tracks the sites whose reverse tunnels have connected. Sites stay in the
//! registry after their tunnel drops so reconnections can be told apart from
//! first connections.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::error::TunnelError;
use crate::site::{RemoteSite, Tunnel};

/// Registry of remote sites (connected and disconnected)
///
/// Thread-safe registry using DashMap for concurrent access.
#[derive(Default)]
pub struct SiteRegistry {
    sites: DashMap<String, RemoteSite>,
}

impl SiteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a site's tunnel connected
    pub fn register(&self, mut site: RemoteSite) {
        let name = site.name.clone();
        let is_reconnect = self.sites.contains_key(&name);

        site.connected = true;
        self.sites.insert(name.clone(), site);

        if is_reconnect {
            info!(site = %name, "Remote site reconnected");
        } else {
            info!(site = %name, "Remote site connected (first time)");
        }
    }

    /// Record that a site's tunnel dropped
    pub fn unregister(&self, name: &str) {
        if let Some(mut site) = self.sites.get_mut(name) {
            site.connected = false;
            info!(site = %name, "Remote site disconnected");
        }
    }

    /// Whether the site has connected at least once
    pub fn is_known(&self, name: &str) -> bool {
        self.sites.contains_key(name)
    }

    /// Number of connected sites
    pub fn len(&self) -> usize {
        self.sites.iter().filter(|s| s.connected).count()
    }

    /// Whether no site is connected
    pub fn is_empty(&self) -> bool {
        !self.sites.iter().any(|s| s.connected)
    }

    fn connected_sites(&self) -> Vec<RemoteSite> {
        let mut sites: Vec<RemoteSite> = self
            .sites
            .iter()
            .filter(|s| s.connected)
            .map(|s| s.value().clone())
            .collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        sites
    }
}

#[async_trait]
impl Tunnel for SiteRegistry {
    async fn list_sites(&self) -> Result<Vec<RemoteSite>, TunnelError> {
        Ok(self.connected_sites())
    }

    async fn get_site(&self, name: &str) -> Result<RemoteSite, TunnelError> {
        self.sites
            .get(name)
            .map(|s| s.value().clone())
            .ok_or_else(|| TunnelError::SiteNotFound(name.to_string()))
    }
}
