//! Fan-out of one value stream to many independent subscribers.
//!
//! Every watcher in the engine ends in a [`FanOut`]: one producer task
//! publishes, each subscriber owns an unbounded receiver, so a slow
//! subscriber never holds back another one. New subscribers receive the
//! latest value right away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Subscribers<T> {
    current: Option<T>,
    next_id: u64,
    senders: HashMap<u64, UnboundedSender<T>>,
}

/// Broadcast hub remembering the latest value.
pub struct FanOut<T> {
    inner: Mutex<Subscribers<T>>,
}

impl<T: Clone + Send + 'static> FanOut<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                current: None,
                next_id: 0,
                senders: HashMap::new(),
            }),
        }
    }

    /// Hub that already holds `value`
    pub fn with_current(value: T) -> Self {
        let hub = Self::new();
        lock(&hub.inner).current = Some(value);
        hub
    }

    /// Register a subscriber. The current value, if any, is queued at once.
    pub fn subscribe(&self) -> (u64, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        if let Some(current) = &inner.current {
            let _ = tx.send(current.clone());
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.senders.insert(id, tx);
        (id, rx)
    }

    /// Store `value` as current and queue it for every subscriber.
    pub fn publish(&self, value: T) {
        let mut inner = lock(&self.inner);
        inner.senders.retain(|_, tx| tx.send(value.clone()).is_ok());
        inner.current = Some(value);
    }

    /// Drop a subscriber, returning how many remain.
    pub fn unsubscribe(&self, id: u64) -> usize {
        let mut inner = lock(&self.inner);
        inner.senders.remove(&id);
        inner.senders.len()
    }

    pub fn current(&self) -> Option<T> {
        lock(&self.inner).current.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).senders.len()
    }
}

impl<T: Clone + Send + 'static> Default for FanOut<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle releasing a subscription.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once is harmless,
/// and dropping the handle unsubscribes too.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(f)))
    }

    pub fn unsubscribe(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unsubscribe")
            .field(&self.0.is_some())
            .finish()
    }
}

struct Active<T> {
    hub: Arc<FanOut<T>>,
    cancel: CancellationToken,
}

/// A [`FanOut`] whose producer only runs while someone listens.
///
/// The first subscriber starts the producer; the last unsubscribe cancels
/// it and forgets the hub, so the next subscriber starts from scratch.
pub struct Feed<T> {
    active: Mutex<Option<Active<T>>>,
}

impl<T: Clone + Send + 'static> Feed<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(None),
        })
    }

    /// Subscribe, calling `start` with a fresh hub and cancellation token
    /// when no producer is running.
    pub fn subscribe<F>(self: &Arc<Self>, start: F) -> (UnboundedReceiver<T>, Unsubscribe)
    where
        F: FnOnce(Arc<FanOut<T>>, CancellationToken),
    {
        let mut active = lock(&self.active);
        let current = active.get_or_insert_with(|| {
            let hub = Arc::new(FanOut::new());
            let cancel = CancellationToken::new();
            start(hub.clone(), cancel.clone());
            Active { hub, cancel }
        });
        let (id, rx) = current.hub.subscribe();
        let hub = current.hub.clone();
        let feed: Weak<Self> = Arc::downgrade(self);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(feed) = feed.upgrade() {
                feed.release(&hub, id);
            }
        });
        (rx, unsubscribe)
    }

    fn release(&self, hub: &Arc<FanOut<T>>, id: u64) {
        let mut active = lock(&self.active);
        if hub.unsubscribe(id) > 0 {
            return;
        }
        if let Some(current) = active.as_ref()
            && Arc::ptr_eq(&current.hub, hub)
        {
            current.cancel.cancel();
            *active = None;
        }
    }

    /// Latest value while a producer is running
    pub fn current(&self) -> Option<T> {
        lock(&self.active).as_ref().and_then(|a| a.hub.current())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }
}
