//! Lock event sources
//!
//! A source opens watches on the lock backend. Each watch starts with a full
//! listing (`Init`, any number of `InitApply`, `InitDone`) followed by deltas.
//! A stream error or end means the watch was lost; the watcher opens a new one
//! and waits for another full listing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_common::crd::Lock;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::WatchError;

/// One event on a lock watch
#[derive(Clone, Debug, PartialEq)]
pub enum LockEvent {
    /// A full listing is starting
    Init,
    /// A lock that is part of the listing
    InitApply(Lock),
    /// The listing is complete
    InitDone,
    /// A lock was created or updated
    Apply(Lock),
    /// The named lock was deleted
    Delete(String),
}

/// Stream of events from one watch
pub type LockEventStream = BoxStream<'static, Result<LockEvent, WatchError>>;

/// Backend that can be watched for lock changes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockEventSource: Send + Sync {
    /// Open a new watch
    async fn watch(&self) -> Result<LockEventStream, WatchError>;
}

/// Lock source backed by `Lock` custom resources
pub struct KubeLockSource {
    api: Api<Lock>,
    config: watcher::Config,
}

impl KubeLockSource {
    /// Watch every `Lock` in the cluster
    pub fn new(client: Client) -> Self {
        // Shorter than the client's read timeout so the API server closes the
        // watch first
        Self {
            api: Api::all(client),
            config: watcher::Config::default().timeout(25),
        }
    }
}

#[async_trait]
impl LockEventSource for KubeLockSource {
    async fn watch(&self) -> Result<LockEventStream, WatchError> {
        let stream = watcher::watcher(self.api.clone(), self.config.clone()).map(|event| {
            match event {
                Ok(Event::Init) => Ok(LockEvent::Init),
                Ok(Event::InitApply(lock)) => Ok(LockEvent::InitApply(lock)),
                Ok(Event::InitDone) => Ok(LockEvent::InitDone),
                Ok(Event::Apply(lock)) => Ok(LockEvent::Apply(lock)),
                Ok(Event::Delete(lock)) => Ok(LockEvent::Delete(lock.name_any())),
                Err(e) => Err(WatchError::Stream(e.to_string())),
            }
        });
        Ok(stream.boxed())
    }
}

type Subscriber = mpsc::UnboundedSender<Result<LockEvent, WatchError>>;

#[derive(Default)]
struct MemoryState {
    locks: BTreeMap<String, Lock>,
    subscribers: Vec<Subscriber>,
    unavailable: bool,
}

impl MemoryState {
    fn broadcast(&mut self, event: LockEvent) {
        self.subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }
}

/// In-process lock backend
///
/// Used by tests and single-process deployments. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryLockSource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLockSource {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a lock, keyed by its name
    pub fn upsert(&self, lock: Lock) {
        let mut state = self.state.lock();
        state.locks.insert(lock.lock_name(), lock.clone());
        state.broadcast(LockEvent::Apply(lock));
    }

    /// Delete a lock; returns whether it existed
    pub fn delete(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.locks.remove(name).is_some();
        if existed {
            state.broadcast(LockEvent::Delete(name.to_string()));
        }
        existed
    }

    /// End every open watch
    pub fn close_watchers(&self) {
        let mut state = self.state.lock();
        debug!(count = state.subscribers.len(), "Closing lock watches");
        state.subscribers.clear();
    }

    /// Fail every open watch with `message`
    pub fn fail_watchers(&self, message: &str) {
        let mut state = self.state.lock();
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(Err(WatchError::Stream(message.to_string())));
        }
    }

    /// Make new watches succeed or fail
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Number of open watches
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Current locks, ordered by name
    pub fn locks(&self) -> Vec<Lock> {
        self.state.lock().locks.values().cloned().collect()
    }
}

#[async_trait]
impl LockEventSource for MemoryLockSource {
    async fn watch(&self) -> Result<LockEventStream, WatchError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(WatchError::Unavailable("backend unavailable".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Unbounded sends never fail while rx is alive
        let _ = tx.send(Ok(LockEvent::Init));
        for lock in state.locks.values() {
            let _ = tx.send(Ok(LockEvent::InitApply(lock.clone())));
        }
        let _ = tx.send(Ok(LockEvent::InitDone));
        state.subscribers.push(tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_common::crd::{LockSpec, LockTarget};

    fn lock(name: &str, user: &str) -> Lock {
        Lock::new(
            name,
            LockSpec {
                target: LockTarget::user(user),
                message: None,
                expires: None,
            },
        )
    }

    #[tokio::test]
    async fn watch_starts_with_full_listing() {
        let source = MemoryLockSource::new();
        source.upsert(lock("b", "bob"));
        source.upsert(lock("a", "alice"));

        let mut stream = source.watch().await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(LockEvent::Init)));
        assert_eq!(
            stream.next().await,
            Some(Ok(LockEvent::InitApply(lock("a", "alice"))))
        );
        assert_eq!(
            stream.next().await,
            Some(Ok(LockEvent::InitApply(lock("b", "bob"))))
        );
        assert_eq!(stream.next().await, Some(Ok(LockEvent::InitDone)));
    }

    #[tokio::test]
    async fn deltas_follow_listing() {
        let source = MemoryLockSource::new();
        let mut stream = source.watch().await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(LockEvent::Init)));
        assert_eq!(stream.next().await, Some(Ok(LockEvent::InitDone)));

        source.upsert(lock("a", "alice"));
        assert!(source.delete("a"));
        assert!(!source.delete("a"));

        assert_eq!(
            stream.next().await,
            Some(Ok(LockEvent::Apply(lock("a", "alice"))))
        );
        assert_eq!(
            stream.next().await,
            Some(Ok(LockEvent::Delete("a".to_string())))
        );
    }

    #[tokio::test]
    async fn close_and_fail_end_streams() {
        let source = MemoryLockSource::new();
        let mut closed = source.watch().await.unwrap();
        source.close_watchers();
        assert_eq!(source.watcher_count(), 0);
        let rest: Vec<_> = (&mut closed).collect().await;
        assert_eq!(rest.len(), 2);

        let mut failed = source.watch().await.unwrap();
        source.fail_watchers("connection reset");
        let rest: Vec<_> = (&mut failed).collect().await;
        assert_eq!(
            rest.last(),
            Some(&Err(WatchError::Stream("connection reset".to_string())))
        );
    }

    #[tokio::test]
    async fn unavailable_backend_refuses_watch() {
        let source = MemoryLockSource::new();
        source.set_available(false);
        assert!(matches!(
            source.watch().await,
            Err(WatchError::Unavailable(_))
        ));

        source.set_available(true);
        let _stream = source.watch().await.unwrap();
        assert_eq!(source.watcher_count(), 1);
    }
}
