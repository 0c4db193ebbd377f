//! Monitored connections
//!
//! A [`MonitorContext`] is the shared termination state of one connection.
//! The owner reads and writes through a [`TrackingConn`], which records client
//! activity and stops serving I/O once the context is terminated. The first
//! termination wins: it stores the cause, drops the transport, cancels the
//! context and (unless the owner closed the connection) emits one disconnect
//! record. Later terminations are no-ops.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bulwark_common::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

use crate::audit::{AuditEmitter, DisconnectRecord};
use crate::reason::DisconnectReason;

/// Source of a connection's last client activity
pub trait ActivityTracker: Send + Sync {
    /// When the client last sent data
    fn last_active(&self) -> DateTime<Utc>;

    /// Record client activity now
    fn touch(&self);
}

/// Last-activity timestamp shared between a connection and its monitor
pub struct ConnActivity {
    clock: Arc<dyn Clock>,
    last_active_ms: AtomicI64,
}

impl ConnActivity {
    /// Start tracking, counting now as the last activity
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now().timestamp_millis();
        Self {
            clock,
            last_active_ms: AtomicI64::new(now),
        }
    }
}

impl ActivityTracker for ConnActivity {
    fn last_active(&self) -> DateTime<Utc> {
        let ms = self.last_active_ms.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    fn touch(&self) {
        let now = self.clock.now().timestamp_millis();
        self.last_active_ms.fetch_max(now, Ordering::AcqRel);
    }
}

/// Who the disconnect record is about
#[derive(Clone)]
pub struct AuditTarget {
    /// Sink for the record
    pub emitter: Arc<dyn AuditEmitter>,
    /// Principal of the connection
    pub user: String,
    /// Server the connection is attached to
    pub server_id: String,
}

type Closer = Box<dyn FnOnce() + Send>;

struct Session {
    token: CancellationToken,
    cause: OnceLock<DisconnectReason>,
    closer: Mutex<Option<Closer>>,
    activity: Arc<ConnActivity>,
    clock: Arc<dyn Clock>,
    audit: Option<AuditTarget>,
}

/// Termination state of one monitored connection
///
/// Cheap to clone. Cancelled when the connection is terminated or when the
/// parent token passed to [`MonitorContext::new`] is cancelled.
#[derive(Clone)]
pub struct MonitorContext {
    session: Arc<Session>,
}

impl MonitorContext {
    /// Create a context that is cancelled along with `parent`
    ///
    /// When `audit` is set, every termination other than a local close emits
    /// one record through it.
    pub fn new(
        parent: &CancellationToken,
        clock: Arc<dyn Clock>,
        audit: Option<AuditTarget>,
    ) -> Self {
        Self {
            session: Arc::new(Session {
                token: parent.child_token(),
                cause: OnceLock::new(),
                closer: Mutex::new(None),
                activity: Arc::new(ConnActivity::new(clock.clone())),
                clock,
                audit,
            }),
        }
    }

    /// Wrap the connection this context supervises
    ///
    /// Terminating the context drops `conn`, closing the transport.
    pub fn track<T>(&self, conn: T) -> TrackingConn<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let inner = Arc::new(Mutex::new(Some(conn)));
        let shared = inner.clone();
        let closer: Closer = Box::new(move || drop(shared.lock().take()));
        if self.session.closer.lock().replace(closer).is_some() {
            warn!("Monitor context re-attached to a new connection");
        }

        // Terminated before the connection was attached
        if self.session.cause.get().is_some() {
            self.close_transport();
        }

        TrackingConn {
            inner,
            cancelled: Box::pin(self.session.token.clone().cancelled_owned()),
            context: self.clone(),
        }
    }

    /// Client activity of the tracked connection
    pub fn activity(&self) -> Arc<ConnActivity> {
        self.session.activity.clone()
    }

    /// Wait until the context is cancelled
    pub async fn cancelled(&self) {
        self.session.token.cancelled().await
    }

    /// Whether the context is cancelled
    pub fn is_cancelled(&self) -> bool {
        self.session.token.is_cancelled()
    }

    /// Why the connection was terminated, if it was
    pub fn cause(&self) -> Option<DisconnectReason> {
        self.session.cause.get().cloned()
    }

    /// Terminate the connection
    ///
    /// Returns `false` when it was already terminated; the first cause is
    /// kept and nothing is closed or emitted again.
    pub fn terminate(&self, reason: DisconnectReason) -> bool {
        if self.session.cause.set(reason.clone()).is_err() {
            debug!(reason = %reason, "Connection already terminated");
            return false;
        }

        self.close_transport();
        self.session.token.cancel();

        if reason.is_audited() {
            info!(reason = %reason, "Terminating connection");
            self.emit(reason);
        } else {
            debug!("Connection closed");
        }
        true
    }

    fn close_transport(&self) {
        let closer = self.session.closer.lock().take();
        if let Some(close) = closer {
            close();
        }
    }

    fn emit(&self, reason: DisconnectReason) {
        let Some(AuditTarget {
            emitter,
            user,
            server_id,
        }) = self.session.audit.clone()
        else {
            return;
        };
        let record = DisconnectRecord::new(user, server_id, reason, self.session.clock.now());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = emitter.emit(record).await {
                        warn!(error = %e, "Failed to emit disconnect record");
                    }
                });
            }
            Err(_) => warn!(
                user = %record.user,
                reason = %record.message,
                "No runtime to emit disconnect record"
            ),
        }
    }
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.session.cause.get())
            .finish()
    }
}

/// Connection wrapper that records activity and honors termination
///
/// Once the context is terminated reads return EOF and writes fail with
/// `BrokenPipe`. Shutting the wrapper down or dropping it counts as a local
/// close: the monitor stops without emitting a disconnect record.
pub struct TrackingConn<T> {
    inner: Arc<Mutex<Option<T>>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    context: MonitorContext,
}

impl<T> TrackingConn<T> {
    /// Context supervising this connection
    pub fn context(&self) -> &MonitorContext {
        &self.context
    }

    fn terminated(&mut self, cx: &mut Context<'_>) -> bool {
        self.context.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready()
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection terminated")
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackingConn<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.terminated(cx) {
            return Poll::Ready(Ok(()));
        }

        let mut guard = this.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let before = buf.filled().len();
        let polled = Pin::new(inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.context.session.activity.touch();
        }
        polled
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackingConn<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.terminated(cx) {
            return Poll::Ready(Err(broken_pipe()));
        }

        let mut guard = this.inner.lock();
        match guard.as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Err(broken_pipe())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut guard = this.inner.lock();
        match guard.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let polled = {
            let mut guard = this.inner.lock();
            match guard.as_mut() {
                Some(inner) => Pin::new(inner).poll_shutdown(cx),
                None => Poll::Ready(Ok(())),
            }
        };
        if polled.is_ready() {
            this.context.terminate(DisconnectReason::Closed);
        }
        polled
    }
}

impl<T> Drop for TrackingConn<T> {
    fn drop(&mut self) {
        self.context.terminate(DisconnectReason::Closed);
    }
}
