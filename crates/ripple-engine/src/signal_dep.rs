use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use ripple_core::errors::FeedError;
use ripple_core::ids::SourceId;
use ripple_core::request::ExecuteRequest;
use ripple_core::signal::Signal;

use crate::dependency::FeedDependency;
use crate::session::FeedSession;

/// Adapts a push-based signal source (timer, connectivity change, …) into
/// the execution pipeline: every tick triggers an execution pass, with no
/// enable gate. When the signal completes, the dependency unregisters
/// itself from the session.
#[derive(Debug)]
pub struct RefreshSignalDependency<T> {
    id: SourceId,
    signal_name: String,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + PartialEq + 'static> RefreshSignalDependency<T> {
    /// Register on the session and subscribe the signal exactly once. A
    /// failed subscription unregisters the dependency before propagating.
    pub fn attach(
        session: &FeedSession<T>,
        signal: Arc<dyn Signal>,
    ) -> Result<Arc<Self>, FeedError> {
        let dep = Arc::new(Self {
            id: SourceId::new(),
            signal_name: signal.name().to_string(),
            _value: PhantomData,
        });
        session.register_dependency(Arc::clone(&dep) as Arc<dyn FeedDependency<T>>);

        let stream = match signal.subscribe(session.token().child_token()) {
            Ok(stream) => stream,
            Err(e) => {
                session.unregister_dependency(&dep.id);
                return Err(e);
            }
        };

        let weak = session.downgrade();
        let id = dep.id.clone();
        let name = dep.signal_name.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            while stream.next().await.is_some() {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let reason = format!("external refresh signal {name} raised");
                if session.execute(ExecuteRequest::new(id.clone(), reason)).is_err() {
                    break;
                }
            }
            // Source is done (or the session shut down): detach.
            if let Some(session) = weak.upgrade() {
                debug!(source_id = %id, signal = %name, "signal completed, unregistering");
                session.unregister_dependency(&id);
            }
        });

        Ok(dep)
    }
}

impl<T> RefreshSignalDependency<T> {
    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn signal_name(&self) -> &str {
        &self.signal_name
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> FeedDependency<T> for RefreshSignalDependency<T> {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.signal_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ComputeFn;
    use futures::FutureExt;
    use ripple_core::signal::ChannelSignal;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn counting_compute() -> ComputeFn<u32> {
        let count = std::sync::atomic::AtomicU32::new(0);
        let count = Arc::new(count);
        Arc::new(move |_ctx| {
            let count = Arc::clone(&count);
            async move {
                Ok(Some(
                    count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1,
                ))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn every_tick_triggers_an_execution() {
        let session = FeedSession::new(counting_compute());
        let signal = Arc::new(ChannelSignal::new("poll timer"));
        let dep = RefreshSignalDependency::attach(&session, Arc::clone(&signal) as _).unwrap();
        assert_eq!(session.dependency_count(), 1);
        assert_eq!(dep.signal_name(), "poll timer");

        signal.tick();
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut rx = session.subscribe();
            loop {
                rx.changed().await.unwrap();
                let message = rx.borrow_and_update().clone();
                if message.current().data().is_some() {
                    break;
                }
            }
        })
        .await
        .expect("tick produced a pass");
        assert!(session.passes_committed() >= 1);
    }

    #[tokio::test]
    async fn signal_completion_unregisters_the_dependency() {
        let session = FeedSession::new(counting_compute());
        let signal = Arc::new(ChannelSignal::new("connectivity"));
        let _dep = RefreshSignalDependency::attach(&session, Arc::clone(&signal) as _).unwrap();
        assert_eq!(session.dependency_count(), 1);

        signal.complete();
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.dependency_count() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dependency unregistered");
    }

    #[tokio::test]
    async fn failed_subscription_unregisters_before_propagating() {
        let session = FeedSession::new(counting_compute());
        let signal = Arc::new(ChannelSignal::new("claimed"));
        // Claim the single-use receiver so the dependency's subscribe fails.
        let _stream = signal.subscribe(CancellationToken::new()).unwrap();

        let err = RefreshSignalDependency::attach(&session, Arc::clone(&signal) as _).unwrap_err();
        assert_eq!(err.kind(), "signal");
        assert_eq!(session.dependency_count(), 0);
    }
}
