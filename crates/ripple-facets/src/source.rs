use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::change::CollectionChange;

/// Handler invoked synchronously, inside the raising call stack.
pub type ChangeHandler = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Disposable subscription handle. Unsubscribes on `dispose` or drop —
/// there is no ambient attach/detach on the source itself.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn on(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A handle that detaches nothing.
    pub fn empty() -> Self {
        Self { unsubscribe: None }
    }

    pub fn dispose(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// A collection that exposes its native change events through an explicit
/// subscribe-returning-handle contract, plus its current live count.
pub trait ChangeSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscribe(&self, handler: ChangeHandler) -> Subscription;
}

/// Keyed handler registry shared by sources and facets. Handlers are
/// snapshotted before invocation so a handler may subscribe or unsubscribe
/// reentrantly without deadlocking the raise path.
pub(crate) struct HandlerSet<H: ?Sized> {
    slots: Arc<Mutex<Slots<H>>>,
}

struct Slots<H: ?Sized> {
    next: u64,
    entries: Vec<(u64, Arc<H>)>,
}

impl<H: ?Sized + Send + Sync + 'static> HandlerSet<H> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn add(&self, handler: Arc<H>) -> Subscription {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next;
            slots.next += 1;
            slots.entries.push((id, handler));
            id
        };
        let weak: Weak<Mutex<Slots<H>>> = Arc::downgrade(&self.slots);
        Subscription::on(move || {
            if let Some(slots) = weak.upgrade() {
                slots.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.slots
            .lock()
            .entries
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }
}

/// An in-memory item collection raising ranged change events, used as the
/// backing source in tests and demos. Mutations raise synchronously, after
/// the items lock is released.
pub struct VecChangeSource<I> {
    items: Mutex<Vec<I>>,
    handlers: HandlerSet<dyn Fn(&CollectionChange) + Send + Sync>,
}

impl<I: Clone + Send> VecChangeSource<I> {
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: Vec<I>) -> Self {
        Self {
            items: Mutex::new(items),
            handlers: HandlerSet::new(),
        }
    }

    pub fn push(&self, item: I) {
        let index = {
            let mut items = self.items.lock();
            items.push(item);
            items.len() - 1
        };
        self.raise(CollectionChange::Insert { index, count: 1 });
    }

    pub fn insert(&self, index: usize, item: I) {
        {
            let mut items = self.items.lock();
            items.insert(index, item);
        }
        self.raise(CollectionChange::Insert { index, count: 1 });
    }

    pub fn remove(&self, index: usize) -> Option<I> {
        let removed = {
            let mut items = self.items.lock();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.raise(CollectionChange::Remove { index, count: 1 });
        Some(removed)
    }

    pub fn replace(&self, index: usize, item: I) -> Option<I> {
        let replaced = {
            let mut items = self.items.lock();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, item)
        };
        self.raise(CollectionChange::Replace { index, count: 1 });
        Some(replaced)
    }

    pub fn reset(&self, items: Vec<I>) {
        {
            let mut current = self.items.lock();
            *current = items;
        }
        self.raise(CollectionChange::Reset);
    }

    pub fn items(&self) -> Vec<I> {
        self.items.lock().clone()
    }

    fn raise(&self, change: CollectionChange) {
        for handler in self.handlers.snapshot() {
            handler(&change);
        }
    }
}

impl<I: Clone + Send> Default for VecChangeSource<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone + Send> ChangeSource for VecChangeSource<I> {
    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        self.handlers.add(handler)
    }
}
