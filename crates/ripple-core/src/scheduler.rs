use tokio::runtime::Handle;

/// Injectable stand-in for a UI dispatcher: run a task on the context that
/// owns the consumer. Production bindings wrap the platform dispatcher;
/// tests use `InlineScheduler`.
pub trait Scheduler: Send + Sync {
    fn run_on_owner(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs tasks immediately on the calling thread.
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn run_on_owner(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Hands tasks to a tokio runtime.
pub struct SpawnScheduler {
    handle: Handle,
}

impl SpawnScheduler {
    /// Bind to the current runtime. Panics outside a runtime context, like
    /// `Handle::current`.
    pub fn new() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Default for SpawnScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SpawnScheduler {
    fn run_on_owner(&self, task: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move { task() });
    }
}
