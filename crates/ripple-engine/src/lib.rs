//! The ripple execution engine: `FeedSession` (the serialized recomputation
//! pipeline with per-axis change tracking), the dependency protocol
//! (`RefreshDependency`, `RefreshSignalDependency`), and the `AsyncCommand`
//! concurrent execution tracker.

pub mod command;
pub mod dependency;
pub mod error;
pub mod execution;
pub mod refresh;
pub mod session;
pub mod signal_dep;

pub use command::{
    AsyncCommand, CommandConfig, CommandDelegate, CommandError, CommandEvent, CommandExecution,
};
pub use dependency::FeedDependency;
pub use error::{CallbackStage, SessionError};
pub use execution::{FeedExecution, FeedExecutionResult, TransitionBuilder};
pub use refresh::RefreshDependency;
pub use session::{ComputeContext, ComputeFn, FeedSession, SessionConfig, WeakFeedSession};
pub use signal_dep::RefreshSignalDependency;
