//! Disconnect audit records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::reason::DisconnectReason;

/// Record emitted when a monitor terminates a connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRecord {
    /// Principal whose connection was terminated
    pub user: String,
    /// Server the connection was attached to
    pub server_id: String,
    /// Structured reason
    pub reason: DisconnectReason,
    /// Human-readable reason
    pub message: String,
    /// When the connection was terminated
    pub time: DateTime<Utc>,
}

impl DisconnectRecord {
    /// Build a record for `reason`
    pub fn new(
        user: impl Into<String>,
        server_id: impl Into<String>,
        reason: DisconnectReason,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            user: user.into(),
            server_id: server_id.into(),
            message: reason.to_string(),
            reason,
            time,
        }
    }
}

/// Audit emission failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// The audit sink is gone
    #[error("audit sink closed")]
    Closed,
    /// The sink rejected the record
    #[error("audit emission failed: {0}")]
    Emit(String),
}

/// Sink for disconnect records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditEmitter: Send + Sync {
    /// Deliver one record
    async fn emit(&self, record: DisconnectRecord) -> Result<(), AuditError>;
}

/// Writes records to the `bulwark::audit` tracing target
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmitter;

#[async_trait]
impl AuditEmitter for LogEmitter {
    async fn emit(&self, record: DisconnectRecord) -> Result<(), AuditError> {
        info!(
            target: "bulwark::audit",
            user = %record.user,
            server_id = %record.server_id,
            reason = %record.message,
            time = %record.time.to_rfc3339(),
            "Client disconnected"
        );
        Ok(())
    }
}

/// Forwards records to an in-process channel
#[derive(Clone, Debug)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<DisconnectRecord>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiver it feeds
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisconnectRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AuditEmitter for ChannelEmitter {
    async fn emit(&self, record: DisconnectRecord) -> Result<(), AuditError> {
        self.tx.send(record).map_err(|_| AuditError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DisconnectRecord {
        DisconnectRecord::new(
            "alice",
            "node-1",
            DisconnectReason::StaleLockView,
            Utc::now(),
        )
    }

    #[test]
    fn record_carries_reason_text() {
        let record = record();
        assert_eq!(
            record.message,
            "preventive lock-out: lock view is stale and locking mode is strict"
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["serverId"], "node-1");
        assert_eq!(json["reason"]["kind"], "stale_lock_view");
    }

    #[tokio::test]
    async fn channel_emitter_delivers() {
        let (emitter, mut rx) = ChannelEmitter::new();
        emitter.emit(record()).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.user, "alice");
    }

    #[tokio::test]
    async fn channel_emitter_reports_closed_sink() {
        let (emitter, rx) = ChannelEmitter::new();
        drop(rx);
        assert_eq!(emitter.emit(record()).await, Err(AuditError::Closed));
    }

    #[tokio::test]
    async fn log_emitter_never_fails() {
        assert!(LogEmitter.emit(record()).await.is_ok());
    }
}
