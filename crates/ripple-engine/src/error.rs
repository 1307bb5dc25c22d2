use std::fmt;

use ripple_core::errors::FeedError;
use ripple_core::ids::SourceId;

/// Which dependency callback a pass was in when it aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackStage {
    Executing,
    Executed,
}

impl fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executing => f.write_str("on_executing"),
            Self::Executed => f.write_str("on_executed"),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// A dependency callback failed; the pass aborted without committing a
    /// message.
    #[error("dependency {dependency} failed during {stage}: {source}")]
    Dependency {
        dependency: SourceId,
        stage: CallbackStage,
        #[source]
        source: FeedError,
    },

    /// The execution queue is gone — the session has shut down.
    #[error("execution queue closed")]
    QueueClosed,

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dependency { .. } => "dependency",
            Self::QueueClosed => "queue_closed",
            Self::Cancelled => "cancelled",
        }
    }
}
