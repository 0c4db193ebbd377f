//! Dual-path dialer for the authority service
//!
//! Strategies are tried in order, one at a time:
//!
//! 1. [`DialStrategy::DirectTls`]: mTLS straight to the candidate addresses.
//! 2. [`DialStrategy::TunneledSsh`]: through the proxy's reverse tunnel, only
//!    when SSH credentials are available.
//!
//! A leg only succeeds once the liveness probe answers. A client whose probe
//! fails is closed before the next leg starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credentials::{SshCredentials, TlsCredentials};
use crate::error::{DialError, DialFailure, TransportError};
use crate::resolver::{CachingResolver, Resolver, ResolverFactory, DEFAULT_RESOLVER_TTL};

/// Default bound on each leg (connect plus probe)
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport path to the authority service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DialStrategy {
    /// mTLS directly to the authority service
    DirectTls,
    /// mTLS carried over an SSH reverse tunnel through the proxy
    TunneledSsh,
}

impl DialStrategy {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectTls => "direct_tls",
            Self::TunneledSsh => "tunneled_ssh",
        }
    }

    /// Prefix used when reporting a failure of this leg
    pub fn failure_context(&self) -> &'static str {
        match self {
            Self::DirectTls => "failed direct dial to auth server",
            Self::TunneledSsh => "failed dial to auth server through reverse tunnel",
        }
    }
}

impl fmt::Display for DialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a liveness probe
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PingResponse {
    /// Name of the cluster the authority serves
    pub cluster_name: String,
    /// Authority software version
    pub server_version: String,
}

/// Control connection to the authority service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Lightweight round trip proving the connection works
    async fn ping(&self) -> Result<PingResponse, TransportError>;

    /// Release the connection
    async fn close(&self);
}

/// Opens control connections over a concrete transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Connect directly to any of `addrs`
    async fn connect_direct(
        &self,
        addrs: &[String],
        tls: &TlsCredentials,
        insecure: bool,
    ) -> Result<Box<dyn AuthClient>, TransportError>;

    /// Connect through the reverse tunnel endpoint produced by `resolver`
    async fn connect_tunnel(
        &self,
        resolver: Arc<dyn Resolver>,
        ssh: &SshCredentials,
        tls: &TlsCredentials,
        insecure: bool,
    ) -> Result<Box<dyn AuthClient>, TransportError>;
}

/// Parameters for one connect call
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// Candidate authority or proxy addresses; the first doubles as the
    /// proxy address for the tunnel path
    pub addrs: Vec<String>,
    /// Client TLS identity
    pub tls: TlsCredentials,
    /// SSH identity enabling the tunnel path
    pub ssh: Option<SshCredentials>,
    /// Bound on each leg
    pub dial_timeout: Duration,
    /// Skip verification of the proxy's web certificate during discovery
    pub insecure: bool,
}

impl ConnectConfig {
    /// Direct-only config with the default timeout
    pub fn new(addrs: Vec<String>, tls: TlsCredentials) -> Self {
        Self {
            addrs,
            tls,
            ssh: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            insecure: false,
        }
    }

    /// Enable the tunnel path
    pub fn with_ssh(mut self, ssh: SshCredentials) -> Self {
        self.ssh = Some(ssh);
        self
    }

    /// Override the per-leg timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Strategies this config allows, in the order they are tried
    pub fn strategies(&self) -> Vec<DialStrategy> {
        let mut strategies = vec![DialStrategy::DirectTls];
        if self.ssh.is_some() {
            strategies.push(DialStrategy::TunneledSsh);
        }
        strategies
    }
}

/// Produces live control connections to a cluster's authority service
///
/// Holds one caching resolver per proxy address so repeated tunnel dials reuse
/// recent discovery answers. Failed dials are not retried here.
pub struct ClusterDialer {
    factory: Arc<dyn ClientFactory>,
    resolvers: Arc<dyn ResolverFactory>,
    cached: DashMap<String, Arc<CachingResolver>>,
    resolver_ttl: Duration,
}

impl ClusterDialer {
    /// Create a dialer
    pub fn new(factory: Arc<dyn ClientFactory>, resolvers: Arc<dyn ResolverFactory>) -> Self {
        Self {
            factory,
            resolvers,
            cached: DashMap::new(),
            resolver_ttl: DEFAULT_RESOLVER_TTL,
        }
    }

    /// Override how long resolved tunnel endpoints are reused
    pub fn with_resolver_ttl(mut self, ttl: Duration) -> Self {
        self.resolver_ttl = ttl;
        self
    }

    /// Connect and verify liveness, falling back to the tunnel path
    pub async fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn AuthClient>, DialError> {
        if config.addrs.is_empty() {
            return Err(DialError::NoAddresses);
        }
        debug!(addrs = ?config.addrs, "Connecting to auth server");

        let mut failures = Vec::new();
        for strategy in config.strategies() {
            match self.dial(strategy, config).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "Auth server dial failed");
                    failures.push((strategy, e));
                }
            }
        }

        Err(DialError::Failed(DialFailure { failures }))
    }

    async fn dial(
        &self,
        strategy: DialStrategy,
        config: &ConnectConfig,
    ) -> Result<Box<dyn AuthClient>, TransportError> {
        let deadline = Instant::now() + config.dial_timeout;
        let timed_out = || TransportError::Timeout(config.dial_timeout);

        let client = tokio::time::timeout_at(deadline, self.open(strategy, config))
            .await
            .map_err(|_| timed_out())??;

        let probe = match tokio::time::timeout_at(deadline, client.ping()).await {
            Ok(probe) => probe,
            Err(_) => Err(timed_out()),
        };
        match probe {
            Ok(pong) => {
                info!(
                    strategy = %strategy,
                    cluster = %pong.cluster_name,
                    version = %pong.server_version,
                    "Connected to auth server"
                );
                Ok(client)
            }
            Err(e) => {
                // Release before the next leg starts
                client.close().await;
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        strategy: DialStrategy,
        config: &ConnectConfig,
    ) -> Result<Box<dyn AuthClient>, TransportError> {
        match strategy {
            DialStrategy::DirectTls => {
                self.factory
                    .connect_direct(&config.addrs, &config.tls, config.insecure)
                    .await
            }
            DialStrategy::TunneledSsh => {
                let ssh = config
                    .ssh
                    .as_ref()
                    .ok_or_else(|| TransportError::Credentials("no SSH credentials".to_string()))?;
                let resolver = self.resolver_for(&config.addrs[0], config)?;
                self.factory
                    .connect_tunnel(resolver, ssh, &config.tls, config.insecure)
                    .await
            }
        }
    }

    fn resolver_for(
        &self,
        proxy_addr: &str,
        config: &ConnectConfig,
    ) -> Result<Arc<dyn Resolver>, TransportError> {
        if let Some(cached) = self.cached.get(proxy_addr) {
            return Ok(cached.value().clone());
        }

        let web = self
            .resolvers
            .web_resolver(proxy_addr, config.insecure, config.dial_timeout)?;
        let resolver = self
            .cached
            .entry(proxy_addr.to_string())
            .or_insert_with(|| Arc::new(CachingResolver::with_ttl(web, self.resolver_ttl)))
            .value()
            .clone();
        Ok(resolver)
    }
}
