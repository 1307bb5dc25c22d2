use crate::ids::SourceId;

/// Typed error hierarchy for feed computation and the dependency protocol.
/// Errors carried on the `ERROR` axis are wrapped in `Arc` so they can be
/// shared across messages without cloning the payload.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FeedError {
    /// The feed's own compute future failed. Becomes the `ERROR` axis of the
    /// next message, never thrown at subscribers.
    #[error("feed computation failed: {0}")]
    Compute(String),

    /// A dependency callback failed. Aborts the current pass.
    #[error("dependency {dependency} failed: {message}")]
    Dependency {
        dependency: SourceId,
        message: String,
    },

    /// A signal source could not be subscribed or errored mid-stream.
    #[error("signal source error: {0}")]
    Signal(String),

    /// The session (or an execution) was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl FeedError {
    /// Short classification string for logging/metrics and for the
    /// `ERROR`-axis "same kind" equality rule.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Compute(_) => "compute",
            Self::Dependency { .. } => "dependency",
            Self::Signal(_) => "signal",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
