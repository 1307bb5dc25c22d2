use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use ripple_core::ids::SourceId;

use crate::change::{CollectionChange, VectorChange};
use crate::facet::CollectionChangedFacet;
use crate::source::{HandlerSet, Subscription};

struct ChildSlot {
    facet: Arc<CollectionChangedFacet>,
    _subscription: Subscription,
}

struct FlatInner {
    children: Mutex<Vec<ChildSlot>>,
    collection_handlers: HandlerSet<dyn Fn(&CollectionChange) + Send + Sync>,
    vector_handlers: HandlerSet<dyn Fn(&VectorChange) + Send + Sync>,
}

impl FlatInner {
    /// Base offset of a child = sum of the current live counts of every
    /// child before it, computed at the moment an event is translated —
    /// never cached, because sibling groups change size between events.
    fn base_offset(&self, group: &SourceId) -> Option<usize> {
        let children = self.children.lock();
        let mut offset = 0;
        for slot in children.iter() {
            if slot.facet.group() == group {
                return Some(offset);
            }
            offset += slot.facet.len();
        }
        None
    }

    /// Handlers are invoked outside the children lock.
    fn raise(&self, change: CollectionChange) {
        for handler in self.collection_handlers.snapshot() {
            handler(&change);
        }
        for vector_change in change.to_vector_changes() {
            for handler in self.vector_handlers.snapshot() {
                handler(&vector_change);
            }
        }
    }
}

/// Aggregates N group facets into a single flat index space for list
/// controls. Every child event is re-raised with its local index shifted by
/// the child's current base offset, synchronously inside the child's raise
/// call — no deferral, no batching.
pub struct FlatCollectionChangedFacet {
    inner: Arc<FlatInner>,
}

impl FlatCollectionChangedFacet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FlatInner {
                children: Mutex::new(Vec::new()),
                collection_handlers: HandlerSet::new(),
                vector_handlers: HandlerSet::new(),
            }),
        }
    }

    /// Attach a child facet at the end of the group order.
    ///
    /// With `snapshot: Some(count)`, one single-item Insert is synthesized
    /// per item already present at attach time, at the child's base offset,
    /// highest global index first — so subscribers attaching mid-stream do
    /// not miss pre-existing items. With `None`, nothing is replayed: the
    /// caller asserts there is nothing to replay.
    pub fn add_child(&self, child: Arc<CollectionChangedFacet>, snapshot: Option<usize>) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = child.on_collection_changed(move |tagged| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(offset) = inner.base_offset(&tagged.group) else {
                warn!(group = %tagged.group, "change from a detached group dropped");
                return;
            };
            inner.raise(tagged.change.offset_by(offset));
        });

        let base = {
            let mut children = self.inner.children.lock();
            let base: usize = children.iter().map(|slot| slot.facet.len()).sum();
            children.push(ChildSlot {
                facet: child,
                _subscription: subscription,
            });
            base
        };

        if let Some(count) = snapshot {
            for i in (0..count).rev() {
                self.inner.raise(CollectionChange::Insert {
                    index: base + i,
                    count: 1,
                });
            }
        }
    }

    /// Detach a child and dispose its subscription. No synthetic events:
    /// offsets are recomputed live, so a detached group's items leave the
    /// flat index space immediately.
    pub fn remove_child(&self, group: &SourceId) -> Option<Arc<CollectionChangedFacet>> {
        let mut children = self.inner.children.lock();
        let position = children.iter().position(|slot| slot.facet.group() == group)?;
        let slot = children.remove(position);
        Some(slot.facet)
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    /// Total flat item count across all children, live.
    pub fn total_len(&self) -> usize {
        self.inner
            .children
            .lock()
            .iter()
            .map(|slot| slot.facet.len())
            .sum()
    }

    /// Current base offset of a child, or `None` if it is not attached.
    pub fn base_offset(&self, group: &SourceId) -> Option<usize> {
        self.inner.base_offset(group)
    }

    pub fn on_collection_changed(
        &self,
        handler: impl Fn(&CollectionChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.collection_handlers.add(Arc::new(handler))
    }

    pub fn on_vector_changed(
        &self,
        handler: impl Fn(&VectorChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.vector_handlers.add(Arc::new(handler))
    }
}

impl Default for FlatCollectionChangedFacet {
    fn default() -> Self {
        Self::new()
    }
}
