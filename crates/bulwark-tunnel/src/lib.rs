//! Remote site tunnel with access filtering
//!
//! [`SiteRegistry`] is the raw tunnel: it knows every site whose reverse tunnel
//! has connected. [`AuthorizedTunnel`] wraps any [`Tunnel`] and hides the
//! sites a caller's policy does not allow.

#![deny(missing_docs)]

pub mod authorized;
pub mod error;
pub mod registry;
pub mod site;
pub mod store;

pub use authorized::AuthorizedTunnel;
pub use error::TunnelError;
pub use registry::SiteRegistry;
pub use site::{RemoteSite, Tunnel};
pub use store::{ClusterGetter, KubeClusterStore};
