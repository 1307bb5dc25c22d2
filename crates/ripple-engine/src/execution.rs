use std::fmt;
use std::sync::Arc;

use ripple_core::entry::EntryBuilder;
use ripple_core::errors::FeedError;
use ripple_core::ids::ExecutionId;
use ripple_core::request::ExecuteRequest;

/// A deferred axis-update contribution from a dependency, applied during the
/// pass's final fold in enqueue order.
pub type TransitionBuilder<T> = Box<dyn FnOnce(&mut EntryBuilder<T>) + Send>;

/// The mutable in-flight state of one execution pass: the batch of requests
/// that triggered it and the state transitions dependencies have enqueued.
/// Owned exclusively by the session for the duration of the pass and
/// discarded after it commits.
pub struct FeedExecution<T> {
    id: ExecutionId,
    requests: Vec<ExecuteRequest>,
    builders: Vec<TransitionBuilder<T>>,
}

impl<T> FeedExecution<T> {
    pub fn new(requests: Vec<ExecuteRequest>) -> Self {
        Self {
            id: ExecutionId::new(),
            requests,
            builders: Vec::new(),
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// The requests that triggered this pass, in arrival order.
    pub fn requests(&self) -> &[ExecuteRequest] {
        &self.requests
    }

    /// Enqueue a state transition to fold into the eventual message.
    pub fn enqueue(&mut self, builder: TransitionBuilder<T>) {
        self.builders.push(builder);
    }

    pub fn pending_transitions(&self) -> usize {
        self.builders.len()
    }

    pub(crate) fn take_builders(&mut self) -> Vec<TransitionBuilder<T>> {
        std::mem::take(&mut self.builders)
    }
}

impl<T> fmt::Debug for FeedExecution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedExecution")
            .field("id", &self.id)
            .field("requests", &self.requests.len())
            .field("builders", &self.builders.len())
            .finish()
    }
}

/// The outcome of the feed's own computation for one pass.
pub enum FeedExecutionResult<T> {
    /// The computation settled on a value (`None` = the feed computed "no
    /// value", e.g. an empty source).
    Value(Option<Arc<T>>),
    /// The computation failed; becomes the `ERROR` axis.
    Failed(Arc<FeedError>),
}

impl<T> Clone for FeedExecutionResult<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(v) => Self::Value(v.clone()),
            Self::Failed(e) => Self::Failed(Arc::clone(e)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FeedExecutionResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

impl<T> FeedExecutionResult<T> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Value(Some(v)) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<FeedError>> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}
