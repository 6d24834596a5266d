use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

use tokio::sync::watch;

use hassdash_api::snapshot::Snapshot;

pub type Callback = Arc<dyn Fn(&Arc<Snapshot>) + Send + Sync>;

type Subscribers = Mutex<BTreeMap<u64, Callback>>;

fn lock(subs: &Subscribers) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
    subs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Owner of the current snapshot, with callback and channel fan-out.
///
/// Published snapshots are never mutated. Each update builds a new one and
/// swaps the `Arc`, so a reader always sees one complete snapshot.
///
/// Callback delivery is serialized. When updates race, or a callback
/// updates the hub itself, the update holding the delivery lock keeps
/// delivering until it has handed out the latest snapshot. The last snapshot
/// a callback receives is therefore always the current one.
pub struct SnapshotHub {
    tx: watch::Sender<Arc<Snapshot>>,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
    delivering: Mutex<()>,
    pending: AtomicBool,
}

impl SnapshotHub {
    #[must_use]
    pub fn new(initial: Snapshot) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            tx,
            subscribers: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            delivering: Mutex::new(()),
            pending: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    /// Replace the snapshot with `func(current)` and notify everyone.
    pub fn update(&self, func: impl FnOnce(&Snapshot) -> Snapshot) -> Arc<Snapshot> {
        let mut published = None;
        self.tx.send_modify(|current| {
            let next = Arc::new(func(current));
            *current = next.clone();
            published = Some(next);
        });
        let snapshot = published.unwrap_or_else(|| self.current());
        self.notify();
        snapshot
    }

    fn notify(&self) {
        self.pending.store(true, Ordering::SeqCst);
        while self.pending.load(Ordering::SeqCst) {
            let _delivering = match self.delivering.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(err)) => err.into_inner(),
                // the holder picks up our snapshot before releasing
                Err(TryLockError::WouldBlock) => return,
            };
            while self.pending.swap(false, Ordering::SeqCst) {
                let snapshot = self.current();
                // callbacks may subscribe or unsubscribe, so run them unlocked
                let callbacks: Vec<Callback> = lock(&self.subscribers).values().cloned().collect();
                for callback in callbacks {
                    callback(&snapshot);
                }
            }
        }
    }

    /// Register `callback`. It is invoked once right away with the current
    /// snapshot, then after every update until unsubscribed.
    pub fn subscribe(&self, callback: impl Fn(&Arc<Snapshot>) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);
        lock(&self.subscribers).insert(id, callback.clone());
        callback(&self.current());

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Drop every callback.
    pub fn clear(&self) {
        lock(&self.subscribers).clear();
    }
}

/// Handle returned by [`SnapshotHub::subscribe`].
///
/// Dropping the handle does not unsubscribe.
#[must_use]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.subscribers
            .upgrade()
            .is_some_and(|subs| lock(&subs).remove(&self.id).is_some())
    }
}
