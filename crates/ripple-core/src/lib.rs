//! Core value types for the ripple feed engine: the axis/entry/message
//! model with per-axis change detection, refresh tokens, execute requests
//! and the session request bus, and the signal/scheduler capabilities.

pub mod axis;
pub mod entry;
pub mod errors;
pub mod ids;
pub mod message;
pub mod request;
pub mod scheduler;
pub mod signal;
pub mod token;

pub use axis::{MessageAxis, Progress, DATA, ERROR, PROGRESS, REFRESH};
pub use entry::{AxisValue, ChangeSet, EntryBuilder, MessageEntry};
pub use errors::FeedError;
pub use ids::{ExecutionId, RequestId, SessionId, SourceId};
pub use message::Message;
pub use request::{ExecuteRequest, RefreshRequest, RequestBus, RequestStream, SessionRequest};
pub use scheduler::{InlineScheduler, Scheduler, SpawnScheduler};
pub use signal::{ChannelSignal, Signal, SignalStream};
pub use token::{RefreshToken, RefreshTokenSource};
