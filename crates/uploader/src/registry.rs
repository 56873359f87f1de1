//! Live sessions and their event subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chunkwise_protocol::{EventKind, ProgressEvent};
use chunkwise_transfer::{ChunkSource, UploadSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A registered session with its byte source and subscribers.
pub(crate) struct SessionEntry {
    pub(crate) session: UploadSession,
    pub(crate) source: Arc<dyn ChunkSource>,
    pub(crate) cancel: CancellationToken,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ProgressEvent>>>,
    next_subscriber: AtomicU64,
    driving: AtomicBool,
}

impl SessionEntry {
    pub(crate) fn new(session: UploadSession, source: Arc<dyn ChunkSource>) -> Self {
        Self {
            session,
            source,
            cancel: CancellationToken::new(),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            driving: AtomicBool::new(false),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<ProgressEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds an event from the current snapshot and sends it to every
    /// subscriber. Closed subscribers are dropped.
    pub(crate) fn emit(&self, kind: EventKind) {
        let snap = self.session.snapshot();
        let event = ProgressEvent {
            session_id: snap.session_id,
            progress: snap.progress,
            speed: snap.speed,
            eta_secs: snap.eta.map(|d| d.as_secs_f64()),
            kind,
        };
        tracing::trace!(session_id = %event.session_id, kind = ?event.kind, "emit");
        self.subscribers()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers().insert(id, tx);
        Subscription {
            rx,
            handle: SubscriptionHandle {
                entry: Arc::downgrade(self),
                id,
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Claims the transfer driver slot. Returns `None` if a driver is
    /// already running.
    pub(crate) fn try_drive(self: &Arc<Self>) -> Option<DriveGuard> {
        self.driving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DriveGuard {
                entry: Arc::clone(self),
            })
    }

    pub(crate) fn is_driving(&self) -> bool {
        self.driving.load(Ordering::Acquire)
    }
}

/// Releases the driver slot on drop.
pub(crate) struct DriveGuard {
    entry: Arc<SessionEntry>,
}

impl Drop for DriveGuard {
    fn drop(&mut self) {
        self.entry.driving.store(false, Ordering::Release);
    }
}

/// Receives progress events for one session.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once unsubscribed or the
    /// session was removed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Returns a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Detaches from the session; buffered events are still readable.
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

/// Detaches a subscription, possibly from another task.
#[derive(Clone)]
pub struct SubscriptionHandle {
    entry: Weak<SessionEntry>,
    id: u64,
}

impl SubscriptionHandle {
    /// Idempotent; a no-op once the session is gone.
    pub fn unsubscribe(&self) {
        if let Some(entry) = self.entry.upgrade() {
            entry.subscribers().remove(&self.id);
        }
    }
}

/// Sessions known to one client, keyed by server-issued id.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        self.lock().insert(entry.session.id(), Arc::clone(&entry));
        entry
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.lock().get(session_id).cloned()
    }

    pub(crate) fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.lock().remove(session_id)
    }

    pub(crate) fn all(&self) -> Vec<Arc<SessionEntry>> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chunkwise_transfer::{ChunkPlan, MemorySource, ProgressModel};

    use super::*;

    fn entry() -> Arc<SessionEntry> {
        let plan = ChunkPlan::new(8, 4, u64::MAX).unwrap();
        let session = UploadSession::new(
            plan,
            "a.mp3".into(),
            "fp".into(),
            BTreeMap::new(),
            ProgressModel::new(8, None, None),
        );
        session.start("s1".into()).unwrap();
        let source: Arc<dyn ChunkSource> = Arc::new(MemorySource::new(vec![0u8; 8]));
        Arc::new(SessionEntry::new(session, source))
    }

    #[test]
    fn events_reach_every_subscriber() {
        let entry = entry();
        let mut a = entry.subscribe();
        let mut b = entry.subscribe();

        entry.session.acknowledge(0).unwrap();
        entry.emit(EventKind::ChunkAck { index: 0 });

        for sub in [&mut a, &mut b] {
            let evt = sub.try_recv().unwrap();
            assert_eq!(evt.session_id, "s1");
            assert_eq!(evt.kind, EventKind::ChunkAck { index: 0 });
            assert!((evt.progress - 50.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let entry = entry();
        let mut sub = entry.subscribe();
        let handle = sub.handle();

        handle.unsubscribe();
        handle.unsubscribe();
        sub.unsubscribe();
        assert_eq!(entry.subscriber_count(), 0);

        entry.emit(EventKind::UploadPaused);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropped_subscription_pruned_on_emit() {
        let entry = entry();
        let sub = entry.subscribe();
        let _keep = entry.subscribe();
        drop(sub);

        entry.emit(EventKind::UploadPaused);
        assert_eq!(entry.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_after_entry_dropped() {
        let entry = entry();
        let sub = entry.subscribe();
        drop(entry);
        sub.unsubscribe();
    }

    #[test]
    fn single_driver() {
        let entry = entry();
        let guard = entry.try_drive().unwrap();
        assert!(entry.is_driving());
        assert!(entry.try_drive().is_none());
        drop(guard);
        assert!(!entry.is_driving());
        assert!(entry.try_drive().is_some());
    }

    #[test]
    fn registry_keyed_by_session_id() {
        let registry = SessionRegistry::default();
        let plan = ChunkPlan::new(4, 4, u64::MAX).unwrap();
        let session = UploadSession::new(
            plan,
            "a.mp3".into(),
            "fp".into(),
            BTreeMap::new(),
            ProgressModel::new(4, None, None),
        );
        session.start("abc".into()).unwrap();
        let source: Arc<dyn ChunkSource> = Arc::new(MemorySource::new(vec![1u8; 4]));
        registry.insert(SessionEntry::new(session, source));

        assert!(registry.get("abc").is_some());
        assert_eq!(registry.all().len(), 1);
        assert!(registry.remove("abc").is_some());
        assert!(registry.get("abc").is_none());
    }
}
