use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ripple_core::ids::ExecutionId;
use ripple_telemetry::MetricsRecorder;

/// Failure of one command execution, surfaced only through
/// `CommandEvent::Completed` — never thrown on the caller's thread.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CommandError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// One tracked invocation: created at `execute` call time, completed exactly
/// once, never reused.
#[derive(Clone, Debug)]
pub struct CommandExecution<P> {
    pub id: ExecutionId,
    pub parameter: P,
    pub started_at: DateTime<Utc>,
}

/// Lifecycle events for command executions.
#[derive(Clone, Debug)]
pub enum CommandEvent<P> {
    Started {
        execution: CommandExecution<P>,
    },
    Completed {
        execution: CommandExecution<P>,
        /// `None` on success; cancellation reports `CommandError::Cancelled`.
        error: Option<Arc<CommandError>>,
    },
}

impl<P> CommandEvent<P> {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
        }
    }

    pub fn execution(&self) -> &CommandExecution<P> {
        match self {
            Self::Started { execution } | Self::Completed { execution, .. } => execution,
        }
    }
}

/// The async work a command runs per execution.
pub type CommandDelegate<P> =
    Arc<dyn Fn(P, CancellationToken) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync>;

/// Configuration for a command.
#[derive(Clone, Default)]
pub struct CommandConfig {
    pub event_capacity: Option<usize>,
    pub metrics: Option<Arc<MetricsRecorder>>,
}

struct CommandInner<P> {
    name: String,
    delegate: CommandDelegate<P>,
    live: DashMap<ExecutionId, CommandExecution<P>>,
    event_tx: broadcast::Sender<CommandEvent<P>>,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<P: Clone + Send + Sync + 'static> CommandInner<P> {
    /// The single completion path. Exactly once per execution id; a second
    /// completion for the same id is a programmer error and fails loudly.
    fn complete(&self, id: &ExecutionId, error: Option<Arc<CommandError>>) {
        let Some((_, execution)) = self.live.remove(id) else {
            panic!("command execution {id} reported completed twice");
        };
        if let Some(metrics) = &self.metrics {
            metrics.gauge_inc("command.executions.active", &[("command", &self.name)], -1.0);
        }
        self.send_event(CommandEvent::Completed { execution, error });
    }

    fn send_event(&self, event: CommandEvent<P>) {
        if self.event_tx.send(event).is_err() {
            warn!(command = %self.name, "no command event receivers — event dropped");
        }
    }
}

/// Tracks unlimited overlapping asynchronous executions of one action. The
/// command imposes no mutual exclusion — any required serialization is the
/// delegate's own responsibility. Disposal cancels the shared token, and
/// every still-running execution still reports completion (as cancelled).
pub struct AsyncCommand<P> {
    inner: Arc<CommandInner<P>>,
}

impl<P> Clone for AsyncCommand<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Clone + Send + Sync + 'static> AsyncCommand<P> {
    pub fn new(name: impl Into<String>, delegate: CommandDelegate<P>) -> Self {
        Self::with_config(name, delegate, CommandConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        delegate: CommandDelegate<P>,
        config: CommandConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.unwrap_or(64));
        Self {
            inner: Arc::new(CommandInner {
                name: name.into(),
                delegate,
                live: DashMap::new(),
                event_tx,
                cancel: CancellationToken::new(),
                metrics: config.metrics,
            }),
        }
    }

    /// Convenience constructor from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        use futures::FutureExt;
        Self::new(name, Arc::new(move |p, ct| f(p, ct).boxed()))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start one execution. Synchronously — before any awaiting — the
    /// execution is recorded and `Started` is raised, so a caller that
    /// inspects `in_flight` immediately after this returns will see it.
    /// Overlapping calls run fully concurrently.
    pub fn execute(&self, parameter: P) -> ExecutionId {
        let execution = CommandExecution {
            id: ExecutionId::new(),
            parameter,
            started_at: Utc::now(),
        };
        let id = execution.id.clone();
        self.inner.live.insert(id.clone(), execution.clone());
        if let Some(metrics) = &self.inner.metrics {
            metrics.gauge_inc(
                "command.executions.active",
                &[("command", &self.inner.name)],
                1.0,
            );
        }
        self.inner.send_event(CommandEvent::Started { execution: execution.clone() });

        let inner = Arc::clone(&self.inner);
        let execution_token = self.inner.cancel.child_token();
        let work = (self.inner.delegate)(execution.parameter, execution_token);
        tokio::spawn(async move {
            // Race the delegate against the command token: even a delegate
            // that ignores its token reports completion on disposal.
            let error = tokio::select! {
                result = work => result.err().map(Arc::new),
                _ = inner.cancel.cancelled() => Some(Arc::new(CommandError::Cancelled)),
            };
            inner.complete(&id, error);
        });

        execution.id
    }

    /// Resolve a future-valued parameter source (e.g. a feed's current
    /// value) off the caller's context, then execute. Resolution never
    /// blocks the caller.
    pub fn execute_resolving<F>(&self, source: F) -> tokio::task::JoinHandle<ExecutionId>
    where
        F: std::future::Future<Output = P> + Send + 'static,
    {
        let command = self.clone();
        tokio::spawn(async move {
            let parameter = source.await;
            command.execute(parameter)
        })
    }

    /// Number of executions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.live.len()
    }

    pub fn is_executing(&self) -> bool {
        !self.inner.live.is_empty()
    }

    /// Snapshot of the live execution records.
    pub fn executions(&self) -> Vec<CommandExecution<P>> {
        self.inner.live.iter().map(|e| e.value().clone()).collect()
    }

    pub fn events(&self) -> broadcast::Receiver<CommandEvent<P>> {
        self.inner.event_tx.subscribe()
    }

    /// Cancel the shared token. Cooperative: every in-flight execution
    /// still reaches `Completed` (as cancelled) — disposal never drops an
    /// execution unreported.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}
