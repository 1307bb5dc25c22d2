use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ripple_core::errors::FeedError;
use ripple_core::ids::SourceId;

use crate::execution::{FeedExecution, FeedExecutionResult};

/// A pluggable unit that can request or react to a feed's recomputation.
/// Registered on a session and invoked at both ends of every execution pass.
///
/// An error returned from either callback aborts the pass — it is not
/// swallowed by the session. A dependency that fails during its own
/// subscription setup must unregister itself before propagating.
#[async_trait]
pub trait FeedDependency<T>: Send + Sync {
    /// Stable identity, used for registration and request correlation.
    fn id(&self) -> &SourceId;

    /// Human-readable label for logs.
    fn name(&self) -> &str {
        "dependency"
    }

    /// Called before the feed's computation runs. May `enqueue` a state
    /// transition on the execution to contribute axis updates to the
    /// eventual message.
    async fn on_executing(
        &self,
        _execution: &mut FeedExecution<T>,
        _cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        Ok(())
    }

    /// Called after the pass's entry has been folded, before the message is
    /// published. May call `session.execute(...)` to chain a follow-up pass;
    /// the chained pass is queued, never run nested.
    async fn on_executed(
        &self,
        _execution: &FeedExecution<T>,
        _result: &FeedExecutionResult<T>,
        _cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        Ok(())
    }
}
