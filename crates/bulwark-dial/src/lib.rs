//! Dialer for a cluster's authority service
//!
//! [`ClusterDialer::connect`] produces a live control connection, preferring a
//! direct mTLS connection and falling back to a connection tunneled through
//! the proxy's reverse tunnel. Both causes are preserved when every path fails.

#![deny(missing_docs)]

pub mod credentials;
pub mod dialer;
pub mod error;
pub mod resolver;

pub use credentials::{SshCredentials, TlsCredentials};
pub use dialer::{
    AuthClient, ClientFactory, ClusterDialer, ConnectConfig, DialStrategy, PingResponse,
    DEFAULT_DIAL_TIMEOUT,
};
pub use error::{DialError, DialFailure, TransportError};
pub use resolver::{
    CachingResolver, Resolver, ResolverFactory, TunnelEndpoint, WebClientResolver,
    WebResolverFactory,
};
