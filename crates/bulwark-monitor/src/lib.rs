//! Connection monitoring for bulwark
//!
//! Attaches a supervisor to every authenticated connection. The supervisor
//! watches certificate expiry, client idleness and the shared lock view, and
//! terminates the connection the moment it is no longer trusted, leaving a
//! typed cause on its [`MonitorContext`] and a [`DisconnectRecord`] in the
//! audit log.

#![deny(missing_docs)]

pub mod audit;
pub mod conn;
pub mod error;
pub mod monitor;
pub mod reason;

pub use audit::{AuditEmitter, AuditError, ChannelEmitter, DisconnectRecord, LogEmitter};
pub use conn::{ActivityTracker, AuditTarget, ConnActivity, MonitorContext, TrackingConn};
pub use error::MonitorError;
pub use monitor::{
    get_disconnect_expired_cert_from_identity, start_monitor, ConnectionMonitor,
    ConnectionMonitorConfig, MonitorConfig, MonitorSettings,
};
pub use reason::DisconnectReason;
