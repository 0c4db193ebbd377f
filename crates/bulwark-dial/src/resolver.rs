//! Reverse-tunnel address resolution
//!
//! The tunnel path dials the proxy's reverse-tunnel listener, whose address is
//! only known to the proxy itself. [`WebClientResolver`] asks the proxy's web
//! endpoint for it; [`CachingResolver`] keeps the answer for a short TTL so a
//! burst of dials does not hammer the proxy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::TransportError;

/// Port of the reverse-tunnel listener when the proxy does not advertise one
pub const DEFAULT_TUNNEL_PORT: u16 = 3024;

/// How long a resolved endpoint is reused
pub const DEFAULT_RESOLVER_TTL: Duration = Duration::from_secs(3);

/// Where to open the tunneled connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// host:port to dial
    pub addr: String,
    /// The proxy multiplexes the tunnel over its TLS web listener
    pub tls_routing: bool,
}

/// Resolves the proxy's current reverse-tunnel endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve the endpoint
    async fn resolve(&self) -> Result<TunnelEndpoint, TransportError>;
}

/// Creates resolvers for proxy addresses
#[cfg_attr(test, mockall::automock)]
pub trait ResolverFactory: Send + Sync {
    /// Resolver for the proxy at `proxy_addr`
    fn web_resolver(
        &self,
        proxy_addr: &str,
        insecure: bool,
        timeout: Duration,
    ) -> Result<Arc<dyn Resolver>, TransportError>;
}

/// Builds [`WebClientResolver`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct WebResolverFactory;

impl ResolverFactory for WebResolverFactory {
    fn web_resolver(
        &self,
        proxy_addr: &str,
        insecure: bool,
        timeout: Duration,
    ) -> Result<Arc<dyn Resolver>, TransportError> {
        Ok(Arc::new(WebClientResolver::new(proxy_addr, insecure, timeout)?))
    }
}

/// Proxy discovery document served at `/webapi/find`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FindResponse {
    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxySettings,
}

/// Proxy listener settings
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProxySettings {
    /// SSH listener settings
    #[serde(default)]
    pub ssh: SshProxySettings,
    /// Whether all protocols are multiplexed over the web listener
    #[serde(default)]
    pub tls_routing_enabled: bool,
}

/// SSH listener settings
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SshProxySettings {
    /// Public address of the reverse-tunnel listener
    #[serde(default, rename = "ssh_tunnel_public_addr")]
    pub tunnel_public_addr: Option<String>,
}

/// Host part of a host[:port] address, keeping IPv6 brackets
fn host_of(addr: &str) -> &str {
    if addr.starts_with('[') {
        return match addr.find(']') {
            Some(end) => &addr[..=end],
            None => addr,
        };
    }
    match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}

fn has_port(addr: &str) -> bool {
    host_of(addr).len() < addr.len()
}

/// Pick the reverse-tunnel endpoint advertised by a proxy (pure function)
pub fn tunnel_endpoint(proxy_addr: &str, find: &FindResponse) -> TunnelEndpoint {
    if find.proxy.tls_routing_enabled {
        return TunnelEndpoint {
            addr: proxy_addr.to_string(),
            tls_routing: true,
        };
    }

    let addr = match find.proxy.ssh.tunnel_public_addr.as_deref() {
        Some(public) if !public.is_empty() && has_port(public) => public.to_string(),
        Some(public) if !public.is_empty() => format!("{}:{}", public, DEFAULT_TUNNEL_PORT),
        _ => format!("{}:{}", host_of(proxy_addr), DEFAULT_TUNNEL_PORT),
    };
    TunnelEndpoint {
        addr,
        tls_routing: false,
    }
}

/// Resolver that queries the proxy's web API
#[derive(Debug)]
pub struct WebClientResolver {
    proxy_addr: String,
    scheme: &'static str,
    client: reqwest::Client,
}

impl WebClientResolver {
    /// Create a resolver for the proxy at `proxy_addr`
    ///
    /// `insecure` skips verification of the proxy's web certificate.
    pub fn new(proxy_addr: &str, insecure: bool, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| TransportError::Resolve(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            proxy_addr: proxy_addr.to_string(),
            scheme: "https",
            client,
        })
    }

    #[cfg(test)]
    fn plaintext(mut self) -> Self {
        self.scheme = "http";
        self
    }

    fn find_url(&self) -> String {
        format!("{}://{}/webapi/find", self.scheme, self.proxy_addr)
    }
}

#[async_trait]
impl Resolver for WebClientResolver {
    async fn resolve(&self) -> Result<TunnelEndpoint, TransportError> {
        let url = self.find_url();
        debug!(url = %url, "Resolving reverse tunnel address");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Resolve(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TransportError::Resolve(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let find: FindResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Resolve(format!("invalid JSON: {}", e)))?;

        let endpoint = tunnel_endpoint(&self.proxy_addr, &find);
        info!(
            proxy = %self.proxy_addr,
            tunnel = %endpoint.addr,
            tls_routing = endpoint.tls_routing,
            "Resolved reverse tunnel address"
        );
        Ok(endpoint)
    }
}

/// Resolver that reuses the last successful answer for a TTL
///
/// Concurrent callers wait for a single in-flight lookup. Failures are not
/// cached.
pub struct CachingResolver {
    inner: Arc<dyn Resolver>,
    ttl: Duration,
    cached: Mutex<Option<(TunnelEndpoint, Instant)>>,
}

impl CachingResolver {
    /// Wrap `inner` with the default TTL
    pub fn new(inner: Arc<dyn Resolver>) -> Self {
        Self::with_ttl(inner, DEFAULT_RESOLVER_TTL)
    }

    /// Wrap `inner` with a custom TTL
    pub fn with_ttl(inner: Arc<dyn Resolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Resolver for CachingResolver {
    async fn resolve(&self) -> Result<TunnelEndpoint, TransportError> {
        let mut cached = self.cached.lock().await;
        if let Some((endpoint, at)) = cached.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(endpoint.clone());
            }
        }

        let endpoint = self.inner.resolve().await?;
        *cached = Some((endpoint.clone(), Instant::now()));
        Ok(endpoint)
    }
}
