use std::sync::Arc;

use parking_lot::Mutex;

use ripple_core::ids::SourceId;

use crate::change::{CollectionChange, VectorChange};
use crate::source::{ChangeSource, HandlerSet, Subscription};

/// A child change, tagged with the group that raised it.
#[derive(Clone, Debug)]
pub struct GroupChange {
    pub group: SourceId,
    pub change: CollectionChange,
}

/// The vector shape of a tagged child change.
#[derive(Clone, Debug)]
pub struct GroupVectorChange {
    pub group: SourceId,
    pub change: VectorChange,
}

/// Wraps one group's item source and re-raises its native change events
/// unchanged — in both the ranged and the vector shape — tagged with the
/// group. Holds the source subscription and disposes it on teardown.
pub struct CollectionChangedFacet {
    group: SourceId,
    label: String,
    source: Arc<dyn ChangeSource>,
    collection_handlers: HandlerSet<dyn Fn(&GroupChange) + Send + Sync>,
    vector_handlers: HandlerSet<dyn Fn(&GroupVectorChange) + Send + Sync>,
    subscription: Mutex<Option<Subscription>>,
}

impl CollectionChangedFacet {
    pub fn new(label: impl Into<String>, source: Arc<dyn ChangeSource>) -> Arc<Self> {
        let facet = Arc::new(Self {
            group: SourceId::new(),
            label: label.into(),
            source,
            collection_handlers: HandlerSet::new(),
            vector_handlers: HandlerSet::new(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&facet);
        let subscription = facet.source.subscribe(Arc::new(move |change| {
            if let Some(facet) = weak.upgrade() {
                facet.raise(*change);
            }
        }));
        *facet.subscription.lock() = Some(subscription);
        facet
    }

    /// Re-raise a change in both shapes, synchronously in the caller's
    /// stack.
    fn raise(&self, change: CollectionChange) {
        let tagged = GroupChange {
            group: self.group.clone(),
            change,
        };
        for handler in self.collection_handlers.snapshot() {
            handler(&tagged);
        }
        for vector_change in change.to_vector_changes() {
            let tagged = GroupVectorChange {
                group: self.group.clone(),
                change: vector_change,
            };
            for handler in self.vector_handlers.snapshot() {
                handler(&tagged);
            }
        }
    }

    pub fn group(&self) -> &SourceId {
        &self.group
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current live item count of the wrapped source.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn on_collection_changed(
        &self,
        handler: impl Fn(&GroupChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.collection_handlers.add(Arc::new(handler))
    }

    pub fn on_vector_changed(
        &self,
        handler: impl Fn(&GroupVectorChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.vector_handlers.add(Arc::new(handler))
    }

    /// Detach from the wrapped source. Events raised after this are not
    /// re-raised.
    pub fn dispose(&self) {
        self.subscription.lock().take();
    }
}
