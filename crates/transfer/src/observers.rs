//! Observer registry with ordered, re-entrant-safe delivery.
//!
//! Updates are queued in transition order together with the set of
//! observers subscribed at that moment, then delivered outside every upload
//! lock. A callback may subscribe, unsubscribe, pause or resume; anything it
//! triggers is queued and delivered after it returns, never nested.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use resumable_protocol::UploadUpdate;

use crate::lock;

/// Callback invoked with every upload update.
pub type UpdateCallback = Arc<dyn Fn(&UploadUpdate) + Send + Sync>;

/// Identifies a subscription for [`unsubscribe`](crate::ResumableUpload::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Target {
    Callback(UpdateCallback),
    Channel(mpsc::UnboundedSender<UploadUpdate>),
}

#[derive(Clone)]
struct Observer {
    id: SubscriptionId,
    target: Arc<Target>,
    active: Arc<AtomicBool>,
}

impl Observer {
    fn is_closed(&self) -> bool {
        match &*self.target {
            Target::Callback(_) => false,
            Target::Channel(tx) => tx.is_closed(),
        }
    }

    fn deliver(&self, update: &UploadUpdate) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        match &*self.target {
            Target::Callback(cb) => cb(update),
            Target::Channel(tx) => {
                let _ = tx.send(update.clone());
            }
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    observers: Vec<Observer>,
    next_id: u64,
    queue: VecDeque<(UploadUpdate, Vec<Observer>)>,
    dispatching: bool,
}

/// Subscribers of one upload.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    inner: Mutex<RegistryInner>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self, callback: UpdateCallback) -> SubscriptionId {
        self.add(Target::Callback(callback))
    }

    pub(crate) fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<UploadUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(Target::Channel(tx));
        rx
    }

    fn add(&self, target: Target) -> SubscriptionId {
        let mut inner = lock(&self.inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push(Observer {
            id,
            target: Arc::new(target),
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    /// Removes a subscription. Updates already queued for it are dropped.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = lock(&self.inner);
        match inner.observers.iter().position(|o| o.id == id) {
            Some(idx) => {
                let observer = inner.observers.remove(idx);
                observer.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).observers.len()
    }

    /// Queues an update for the observers subscribed right now.
    pub(crate) fn enqueue(&self, update: UploadUpdate) {
        let mut inner = lock(&self.inner);
        inner.observers.retain(|o| !o.is_closed());
        let targets = inner.observers.clone();
        inner.queue.push_back((update, targets));
    }

    /// Drains the queue unless another call is already draining it.
    pub(crate) fn dispatch(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.dispatching || inner.queue.is_empty() {
                return;
            }
            inner.dispatching = true;
        }
        let mut guard = DispatchGuard {
            inner: &self.inner,
            armed: true,
        };

        loop {
            let next = {
                let mut inner = lock(&self.inner);
                let next = inner.queue.pop_front();
                if next.is_none() {
                    inner.dispatching = false;
                }
                next
            };
            let Some((update, targets)) = next else {
                guard.armed = false;
                return;
            };
            for observer in &targets {
                observer.deliver(&update);
            }
        }
    }
}

/// Clears the dispatching flag if a callback panics mid-drain.
struct DispatchGuard<'a> {
    inner: &'a Mutex<RegistryInner>,
    armed: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.inner).dispatching = false;
        }
    }
}
