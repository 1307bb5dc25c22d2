use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument};

use ripple_core::axis::Progress;
use ripple_core::errors::FeedError;
use ripple_core::ids::{SessionId, SourceId};
use ripple_core::message::Message;
use ripple_core::request::{
    ExecuteRequest, RefreshRequest, RequestBus, RequestStream, SessionRequest,
};
use ripple_core::scheduler::Scheduler;
use ripple_core::token::RefreshTokenSource;
use ripple_telemetry::MetricsRecorder;

use crate::dependency::FeedDependency;
use crate::error::{CallbackStage, SessionError};
use crate::execution::{FeedExecution, FeedExecutionResult};

/// The feed's own computation, injected at session construction. External
/// collaborator: the session only cares about the settled outcome.
pub type ComputeFn<T> =
    Arc<dyn Fn(ComputeContext) -> BoxFuture<'static, Result<Option<T>, FeedError>> + Send + Sync>;

/// What a compute future gets to work with.
#[derive(Clone)]
pub struct ComputeContext {
    pub session_id: SessionId,
    pub cancel: CancellationToken,
}

/// Configuration for a feed session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Capacity of the context request bus.
    pub request_capacity: usize,
    /// Capacity of the pass-failure broadcast.
    pub failure_capacity: usize,
    pub metrics: Option<Arc<MetricsRecorder>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_capacity: 32,
            failure_capacity: 16,
            metrics: None,
        }
    }
}

struct SessionInner<T> {
    id: SessionId,
    compute: ComputeFn<T>,
    deps: RwLock<Vec<Arc<dyn FeedDependency<T>>>>,
    message_tx: watch::Sender<Message<T>>,
    bus: RequestBus,
    execute_tx: mpsc::UnboundedSender<ExecuteRequest>,
    tokens: RefreshTokenSource,
    cancel: CancellationToken,
    failure_tx: broadcast::Sender<Arc<SessionError>>,
    last_failure: Mutex<Option<Arc<SessionError>>>,
    passes: AtomicU64,
    metrics: Option<Arc<MetricsRecorder>>,
}

/// A lazily, asynchronously computed value exposed for consumption, with
/// per-axis change tracking across recomputations.
///
/// The session is the single serialization point for "what is the current
/// message": a worker task consumes `execute` requests one batch at a time,
/// so exactly one pass commits at once and a chained `execute` from inside a
/// dependency callback is queued, never nested.
pub struct FeedSession<T> {
    inner: Arc<SessionInner<T>>,
}

impl<T> Clone for FeedSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A non-owning handle used by spawned listener tasks so they do not keep
/// the session alive.
pub struct WeakFeedSession<T> {
    inner: Weak<SessionInner<T>>,
}

impl<T> Clone for WeakFeedSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakFeedSession<T> {
    pub fn upgrade(&self) -> Option<FeedSession<T>> {
        self.inner.upgrade().map(|inner| FeedSession { inner })
    }
}

impl<T: Send + Sync + PartialEq + 'static> FeedSession<T> {
    pub fn new(compute: ComputeFn<T>) -> Self {
        Self::with_config(compute, SessionConfig::default())
    }

    pub fn with_config(compute: ComputeFn<T>, config: SessionConfig) -> Self {
        let (execute_tx, execute_rx) = mpsc::unbounded_channel();
        let (message_tx, _) = watch::channel(Message::initial());
        let (failure_tx, _) = broadcast::channel(config.failure_capacity);

        let inner = Arc::new(SessionInner {
            id: SessionId::new(),
            compute,
            deps: RwLock::new(Vec::new()),
            message_tx,
            bus: RequestBus::new(config.request_capacity),
            execute_tx,
            tokens: RefreshTokenSource::new(SourceId::new()),
            cancel: CancellationToken::new(),
            failure_tx,
            last_failure: Mutex::new(None),
            passes: AtomicU64::new(0),
            metrics: config.metrics,
        });

        tokio::spawn(Self::worker(Arc::downgrade(&inner), execute_rx));
        Self { inner }
    }

    /// Worker loop: the serialization point. Each iteration takes one
    /// request plus everything already queued behind it and runs a single
    /// pass over the batch.
    async fn worker(
        weak: Weak<SessionInner<T>>,
        mut rx: mpsc::UnboundedReceiver<ExecuteRequest>,
    ) {
        loop {
            let Some(cancel) = weak.upgrade().map(|i| i.cancel.clone()) else {
                break;
            };
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(r) => r,
                    None => break,
                },
            };
            let Some(inner) = weak.upgrade() else { break };

            let mut batch = vec![request];
            while let Ok(more) = rx.try_recv() {
                batch.push(more);
            }
            Self::run_pass(&inner, batch).await;
        }
    }

    #[instrument(skip_all, fields(session_id = %inner.id))]
    async fn run_pass(inner: &Arc<SessionInner<T>>, requests: Vec<ExecuteRequest>) {
        let started = Instant::now();
        let cancel = inner.cancel.clone();
        let mut execution = FeedExecution::new(requests);
        let deps: Vec<Arc<dyn FeedDependency<T>>> = inner.deps.read().clone();

        // 1. Dependencies may enqueue transitions before the computation.
        for dep in &deps {
            if let Err(e) = dep.on_executing(&mut execution, &cancel).await {
                Self::abort_pass(inner, dep.id().clone(), CallbackStage::Executing, e);
                return;
            }
        }

        // 2. Publish the in-flight transition.
        let current = inner.message_tx.borrow().clone();
        let loading = current.advance(|b| {
            b.set_progress(Progress::Loading);
        });
        inner.message_tx.send_replace(loading);

        // 3. Run the computation. Session cancellation abandons the pass
        //    without committing.
        let compute_fut = (inner.compute)(ComputeContext {
            session_id: inner.id.clone(),
            cancel: cancel.clone(),
        });
        let outcome = tokio::select! {
            outcome = compute_fut => outcome,
            _ = cancel.cancelled() => return,
        };
        let result = match outcome {
            Ok(value) => FeedExecutionResult::Value(value.map(Arc::new)),
            Err(e) => FeedExecutionResult::Failed(Arc::new(e)),
        };

        // 4. Fold enqueued transitions, then the computation result, and
        //    restore the final progress state.
        let transitions = execution.take_builders();
        let current = inner.message_tx.borrow().clone();
        let next = current.advance(|b| {
            for transition in transitions {
                transition(b);
            }
            match &result {
                FeedExecutionResult::Value(value) => {
                    b.set_data(value.clone());
                    b.set_error(None);
                }
                FeedExecutionResult::Failed(e) => {
                    b.set_data(None);
                    b.set_error(Some(Arc::clone(e)));
                }
            }
            b.set_progress(Progress::Final);
        });

        // 5. Dependencies observe the result before publication; a failure
        //    here still aborts the commit.
        for dep in &deps {
            if let Err(e) = dep.on_executed(&execution, &result, &cancel).await {
                Self::abort_pass(inner, dep.id().clone(), CallbackStage::Executed, e);
                return;
            }
        }

        // 6. Publish and discard the pass.
        inner.message_tx.send_replace(next);
        inner.passes.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &inner.metrics {
            metrics.counter_inc("feed.passes.total", &[("outcome", "committed")], 1);
            metrics.histogram_observe(
                "feed.pass.duration_ms",
                &[],
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }
    }

    fn abort_pass(
        inner: &Arc<SessionInner<T>>,
        dependency: SourceId,
        stage: CallbackStage,
        source: FeedError,
    ) {
        let err = Arc::new(SessionError::Dependency {
            dependency,
            stage,
            source,
        });
        error!(session_id = %inner.id, %err, "execution pass aborted");
        *inner.last_failure.lock() = Some(Arc::clone(&err));
        let _ = inner.failure_tx.send(err);
        if let Some(metrics) = &inner.metrics {
            metrics.counter_inc("feed.passes.total", &[("outcome", "aborted")], 1);
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn register_dependency(&self, dep: Arc<dyn FeedDependency<T>>) {
        self.inner.deps.write().push(dep);
    }

    pub fn unregister_dependency(&self, id: &SourceId) -> bool {
        let mut deps = self.inner.deps.write();
        let before = deps.len();
        deps.retain(|d| d.id() != id);
        deps.len() != before
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.deps.read().len()
    }

    /// Enqueue an execution pass. Never runs inline on the calling thread.
    pub fn execute(&self, request: ExecuteRequest) -> Result<(), SessionError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.inner
            .execute_tx
            .send(request)
            .map_err(|_| SessionError::QueueClosed)
    }

    /// The stream of published messages. The receiver starts at the current
    /// message.
    pub fn subscribe(&self) -> watch::Receiver<Message<T>> {
        self.inner.message_tx.subscribe()
    }

    /// The session's ambient request bus.
    pub fn context(&self) -> &RequestBus {
        &self.inner.bus
    }

    /// Typed stream of inbound session requests.
    pub fn requests(&self) -> RequestStream {
        self.inner.bus.subscribe()
    }

    /// Subscribe a handler to inbound requests for the session's lifetime.
    pub fn on_requests(
        &self,
        handler: impl Fn(SessionRequest) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let mut stream = self.requests();
        let cancel = self.token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = stream.next() => match request {
                        Some(r) => handler(r),
                        None => break,
                    },
                }
            }
        })
    }

    /// Broadcast a refresh request on the context bus. The returned handle
    /// carries the tokens registered by whichever dependencies honor it.
    pub fn request_refresh(&self) -> RefreshRequest {
        let request = RefreshRequest::new();
        self.inner
            .bus
            .publish(SessionRequest::Refresh(request.clone()));
        request
    }

    /// Session-lifetime cancellation. Umbrella token for every dependency
    /// registered on this session.
    pub fn token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenSource {
        &self.inner.tokens
    }

    /// Aborted-pass errors, in order. This is how callers observe a
    /// dependency failure: the pass fails to commit and the error lands
    /// here instead.
    pub fn failures(&self) -> broadcast::Receiver<Arc<SessionError>> {
        self.inner.failure_tx.subscribe()
    }

    pub fn last_failure(&self) -> Option<Arc<SessionError>> {
        self.inner.last_failure.lock().clone()
    }

    /// Number of passes committed so far.
    pub fn passes_committed(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    /// Deliver every published message to `callback` on the consumer's own
    /// context via the injected scheduler.
    pub fn observe(
        &self,
        scheduler: Arc<dyn Scheduler>,
        callback: impl Fn(Message<T>) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe();
        let cancel = self.token();
        let callback = Arc::new(callback);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let message = rx.borrow_and_update().clone();
                        let callback = Arc::clone(&callback);
                        scheduler.run_on_owner(Box::new(move || callback(message)));
                    }
                }
            }
        })
    }

    pub fn downgrade(&self) -> WeakFeedSession<T> {
        WeakFeedSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel the session and stop the worker. In-flight dependency work
    /// observes the session token.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;
    use ripple_core::axis::{MessageAxis, DATA, ERROR, PROGRESS};
    use ripple_core::entry::AxisValue;
    use ripple_core::scheduler::InlineScheduler;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_compute() -> (ComputeFn<u32>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let compute: ComputeFn<u32> = Arc::new(move |_ctx| {
            let c = Arc::clone(&c);
            async move { Ok(Some(c.fetch_add(1, Ordering::SeqCst) as u32 + 1)) }.boxed()
        });
        (compute, count)
    }

    fn failing_compute(message: &str) -> ComputeFn<u32> {
        let message = message.to_string();
        Arc::new(move |_ctx| {
            let message = message.clone();
            async move { Err(FeedError::Compute(message)) }.boxed()
        })
    }

    async fn next_final(rx: &mut watch::Receiver<Message<u32>>) -> Message<u32> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.expect("session alive");
                let message = rx.borrow_and_update().clone();
                if message.current().progress().is_final() {
                    return message;
                }
            }
        })
        .await
        .expect("pass committed")
    }

    fn user_request() -> ExecuteRequest {
        ExecuteRequest::new(SourceId::new(), "user requested execution")
    }

    #[tokio::test]
    async fn pass_publishes_loading_then_data() {
        // Gate the compute so the in-flight transition stays observable.
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let g = Arc::clone(&gate);
        let compute: ComputeFn<u32> = Arc::new(move |_ctx| {
            let g = Arc::clone(&g);
            async move {
                g.acquire().await.expect("gate open").forget();
                Ok(Some(1))
            }
            .boxed()
        });
        let session = FeedSession::new(compute);
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();

        rx.changed().await.unwrap();
        let loading = rx.borrow_and_update().clone();
        assert_eq!(loading.current().progress(), Progress::Loading);
        assert!(loading.changes().contains(PROGRESS));

        gate.add_permits(1);
        let committed = next_final(&mut rx).await;
        assert_eq!(committed.current().data(), Some(&1));
        assert!(committed.changes().contains(DATA));
        assert!(committed.changes().contains(PROGRESS));
        assert_eq!(session.passes_committed(), 1);
    }

    #[tokio::test]
    async fn compute_failure_becomes_error_axis() {
        let session = FeedSession::new(failing_compute("backend down"));
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();
        let committed = next_final(&mut rx).await;

        assert!(committed.current().data().is_none());
        assert_eq!(committed.current().error().unwrap().kind(), "compute");
        assert!(committed.changes().contains(ERROR));
        // The failure committed a message; it is not a pass failure.
        assert!(session.last_failure().is_none());
        assert_eq!(session.passes_committed(), 1);
    }

    #[tokio::test]
    async fn error_clears_on_next_success() {
        let flag = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&flag);
        let compute: ComputeFn<u32> = Arc::new(move |_ctx| {
            let f = Arc::clone(&f);
            async move {
                if f.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FeedError::Compute("first attempt".into()))
                } else {
                    Ok(Some(7))
                }
            }
            .boxed()
        });
        let session = FeedSession::new(compute);
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();
        let failed = next_final(&mut rx).await;
        assert!(failed.current().error().is_some());

        session.execute(user_request()).unwrap();
        let recovered = next_final(&mut rx).await;
        assert_eq!(recovered.current().data(), Some(&7));
        assert!(recovered.current().error().is_none());
        assert!(recovered.changes().contains(ERROR));
        assert!(recovered.changes().contains(DATA));
    }

    struct TaggingDependency {
        id: SourceId,
        axis: MessageAxis,
    }

    #[async_trait]
    impl FeedDependency<u32> for TaggingDependency {
        fn id(&self) -> &SourceId {
            &self.id
        }

        async fn on_executing(
            &self,
            execution: &mut FeedExecution<u32>,
            _cancel: &CancellationToken,
        ) -> Result<(), FeedError> {
            let axis = self.axis;
            execution.enqueue(Box::new(move |b| {
                b.set(axis, AxisValue::Custom(Some(Arc::new(true))));
            }));
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueued_transitions_fold_into_the_message() {
        const TAGGED: MessageAxis = MessageAxis::custom("tagged");
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        session.register_dependency(Arc::new(TaggingDependency {
            id: SourceId::new(),
            axis: TAGGED,
        }));
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();
        let committed = next_final(&mut rx).await;

        assert!(committed.changes().contains(TAGGED));
        assert!(matches!(
            committed.current().get(TAGGED),
            AxisValue::Custom(Some(_))
        ));
    }

    struct FailingDependency {
        id: SourceId,
        stage: CallbackStage,
    }

    #[async_trait]
    impl FeedDependency<u32> for FailingDependency {
        fn id(&self) -> &SourceId {
            &self.id
        }

        async fn on_executing(
            &self,
            _execution: &mut FeedExecution<u32>,
            _cancel: &CancellationToken,
        ) -> Result<(), FeedError> {
            if self.stage == CallbackStage::Executing {
                return Err(FeedError::Dependency {
                    dependency: self.id.clone(),
                    message: "refused".into(),
                });
            }
            Ok(())
        }

        async fn on_executed(
            &self,
            _execution: &FeedExecution<u32>,
            _result: &FeedExecutionResult<u32>,
            _cancel: &CancellationToken,
        ) -> Result<(), FeedError> {
            if self.stage == CallbackStage::Executed {
                return Err(FeedError::Dependency {
                    dependency: self.id.clone(),
                    message: "rejected result".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn on_executing_failure_aborts_without_commit() {
        let (compute, count) = counting_compute();
        let session = FeedSession::new(compute);
        session.register_dependency(Arc::new(FailingDependency {
            id: SourceId::new(),
            stage: CallbackStage::Executing,
        }));
        let mut failures = session.failures();

        session.execute(user_request()).unwrap();
        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            failure.as_ref(),
            SessionError::Dependency {
                stage: CallbackStage::Executing,
                ..
            }
        ));
        assert_eq!(session.passes_committed(), 0);
        // The computation never ran.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(session.last_failure().is_some());
    }

    #[tokio::test]
    async fn on_executed_failure_aborts_before_publication() {
        let (compute, count) = counting_compute();
        let session = FeedSession::new(compute);
        session.register_dependency(Arc::new(FailingDependency {
            id: SourceId::new(),
            stage: CallbackStage::Executed,
        }));
        let rx = session.subscribe();
        let mut failures = session.failures();

        session.execute(user_request()).unwrap();
        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            failure.as_ref(),
            SessionError::Dependency {
                stage: CallbackStage::Executed,
                ..
            }
        ));

        // The computation ran but no data message committed — the last
        // published message is the in-flight transition.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(session.passes_committed(), 0);
        assert!(rx.borrow().current().data().is_none());
    }

    struct ChainingDependency {
        id: SourceId,
        session: WeakFeedSession<u32>,
        chained: AtomicUsize,
    }

    #[async_trait]
    impl FeedDependency<u32> for ChainingDependency {
        fn id(&self) -> &SourceId {
            &self.id
        }

        async fn on_executed(
            &self,
            _execution: &FeedExecution<u32>,
            _result: &FeedExecutionResult<u32>,
            _cancel: &CancellationToken,
        ) -> Result<(), FeedError> {
            if self.chained.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(session) = self.session.upgrade() {
                    let _ = session.execute(ExecuteRequest::new(
                        self.id.clone(),
                        "follow-up after first result",
                    ));
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn chained_execute_is_queued_not_nested() {
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        session.register_dependency(Arc::new(ChainingDependency {
            id: SourceId::new(),
            session: session.downgrade(),
            chained: AtomicUsize::new(0),
        }));
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();
        let first = next_final(&mut rx).await;
        assert_eq!(first.current().data(), Some(&1));

        // The chained pass commits on its own, after the first one.
        let second = next_final(&mut rx).await;
        assert_eq!(second.current().data(), Some(&2));
        assert_eq!(session.passes_committed(), 2);
    }

    #[tokio::test]
    async fn requests_queued_behind_a_pass_coalesce_into_one() {
        // A gated first pass lets further requests pile up; they all land
        // in a single follow-up pass.
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        let (g, c) = (Arc::clone(&gate), Arc::clone(&count));
        let compute: ComputeFn<u32> = Arc::new(move |_ctx| {
            let (g, c) = (Arc::clone(&g), Arc::clone(&c));
            async move {
                g.acquire().await.expect("gate open").forget();
                Ok(Some(c.fetch_add(1, Ordering::SeqCst) as u32 + 1))
            }
            .boxed()
        });
        let session = FeedSession::new(compute);
        let mut rx = session.subscribe();

        session.execute(user_request()).unwrap();
        // Wait for the first pass to be in flight, then queue two more.
        rx.changed().await.unwrap();
        session.execute(user_request()).unwrap();
        session.execute(user_request()).unwrap();

        gate.add_permits(2);
        let _first = next_final(&mut rx).await;
        let _second = next_final(&mut rx).await;

        // Give the worker a beat to prove no third pass starts.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.passes_committed(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_after_shutdown_is_rejected() {
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        session.shutdown();
        let err = session.execute(user_request()).unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn unregistered_dependency_no_longer_participates() {
        const TAGGED: MessageAxis = MessageAxis::custom("tagged");
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        let dep = Arc::new(TaggingDependency {
            id: SourceId::new(),
            axis: TAGGED,
        });
        let dep_id = dep.id.clone();
        session.register_dependency(dep);
        assert_eq!(session.dependency_count(), 1);

        assert!(session.unregister_dependency(&dep_id));
        assert!(!session.unregister_dependency(&dep_id));
        assert_eq!(session.dependency_count(), 0);

        let mut rx = session.subscribe();
        session.execute(user_request()).unwrap();
        let committed = next_final(&mut rx).await;
        assert!(!committed.changes().contains(TAGGED));
    }

    #[tokio::test]
    async fn observe_delivers_on_scheduler() {
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _observer = session.observe(Arc::new(InlineScheduler), move |message: Message<u32>| {
            let _ = tx.send(message.current().data().copied());
        });

        session.execute(user_request()).unwrap();

        // The watch may collapse the in-flight transition; only the final
        // delivery is guaranteed.
        let mut seen = Vec::new();
        loop {
            let value = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let done = value == Some(1);
            seen.push(value);
            if done {
                break;
            }
        }
        assert_eq!(seen.last(), Some(&Some(1)));
    }

    #[tokio::test]
    async fn request_bus_reaches_subscribers() {
        let (compute, _) = counting_compute();
        let session = FeedSession::new(compute);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = session.on_requests(move |request| {
            let _ = tx.send(request.request_type());
        });
        // Let the listener subscribe before publishing.
        tokio::task::yield_now().await;

        session.request_refresh();
        let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, "refresh");
    }
}
