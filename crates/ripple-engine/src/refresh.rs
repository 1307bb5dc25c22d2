use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ripple_core::errors::FeedError;
use ripple_core::ids::SourceId;
use ripple_core::request::{ExecuteRequest, SessionRequest};

use crate::dependency::FeedDependency;
use crate::execution::FeedExecution;
use crate::session::FeedSession;

/// Gates whether externally requested refreshes are honored, and turns an
/// honored request into a refresh execution pass.
///
/// Two enable scopes: `enable` arms the gate for the next pass only (the
/// gate auto-resets to the configured default at the start of every
/// `on_executing`), while `enable_until_disabled` / `disable_until_enabled`
/// rewrite the default itself.
///
/// When several refresh requests land in the same pass, only the token with
/// the highest sequence is acted upon — lower-sequence concurrent requests
/// are discarded, not queued, and a token at or below the last-acted
/// sequence is stale and silently dropped.
pub struct RefreshDependency<T> {
    id: SourceId,
    default_enabled: AtomicBool,
    enabled: AtomicBool,
    last_acted: AtomicU64,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + PartialEq + 'static> RefreshDependency<T> {
    /// Register on the session and start listening for refresh requests on
    /// its context bus.
    pub fn attach(session: &FeedSession<T>, is_enabled_until_disabled: bool) -> Arc<Self> {
        let dep = Arc::new(Self {
            id: SourceId::new(),
            default_enabled: AtomicBool::new(is_enabled_until_disabled),
            enabled: AtomicBool::new(is_enabled_until_disabled),
            last_acted: AtomicU64::new(0),
            _value: PhantomData,
        });
        session.register_dependency(Arc::clone(&dep) as Arc<dyn FeedDependency<T>>);

        let weak = session.downgrade();
        let handle = Arc::clone(&dep);
        let _listener = session.on_requests(move |request| {
            let SessionRequest::Refresh(req) = request;
            if !handle.is_enabled() {
                debug!(source_id = %handle.id, "refresh request ignored while disabled");
                return;
            }
            let Some(session) = weak.upgrade() else {
                return;
            };
            let token = session.refresh_tokens().next();
            req.register(token.clone());
            let _ = session.execute(ExecuteRequest::refresh(handle.id.clone(), token));
        });

        dep
    }
}

impl<T> RefreshDependency<T> {
    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Arm the gate for the next pass only.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Arm the gate and make enabled the new default.
    pub fn enable_until_disabled(&self) {
        self.default_enabled.store(true, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Close the gate and make disabled the new default.
    pub fn disable_until_enabled(&self) {
        self.default_enabled.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Sequence of the freshest token acted upon so far.
    pub fn last_acted_sequence(&self) -> u64 {
        self.last_acted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> FeedDependency<T> for RefreshDependency<T> {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn name(&self) -> &str {
        "refresh"
    }

    async fn on_executing(
        &self,
        execution: &mut FeedExecution<T>,
        _cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        // The per-pass gate resets to the configured default at the start
        // of every pass.
        self.enabled
            .store(self.default_enabled.load(Ordering::SeqCst), Ordering::SeqCst);

        let freshest = execution
            .requests()
            .iter()
            .filter(|r| r.issuer == self.id)
            .filter_map(|r| r.refresh.clone())
            .max_by_key(|t| t.sequence);

        if let Some(token) = freshest {
            if token.sequence > self.last_acted.load(Ordering::SeqCst) {
                self.last_acted.store(token.sequence, Ordering::SeqCst);
                execution.enqueue(Box::new(move |b| {
                    b.set_refresh(Some(token));
                }));
            } else {
                debug!(
                    source_id = %self.id,
                    sequence = token.sequence,
                    "stale refresh token dropped"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ComputeFn;
    use futures::FutureExt;
    use ripple_core::message::Message;
    use ripple_core::token::RefreshToken;
    use std::time::Duration;
    use tokio::sync::watch;

    fn refresh_request(issuer: &SourceId, source: &SourceId, sequence: u64) -> ExecuteRequest {
        ExecuteRequest::refresh(
            issuer.clone(),
            RefreshToken {
                source: source.clone(),
                sequence,
            },
        )
    }

    fn standalone() -> RefreshDependency<u32> {
        RefreshDependency {
            id: SourceId::new(),
            default_enabled: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            last_acted: AtomicU64::new(0),
            _value: PhantomData,
        }
    }

    #[tokio::test]
    async fn maximum_sequence_wins_within_one_pass() {
        let dep = standalone();
        let token_source = SourceId::new();
        let cancel = CancellationToken::new();

        let mut execution: FeedExecution<u32> = FeedExecution::new(vec![
            refresh_request(&dep.id, &token_source, 1),
            refresh_request(&dep.id, &token_source, 3),
            refresh_request(&dep.id, &token_source, 2),
        ]);
        dep.on_executing(&mut execution, &cancel).await.unwrap();

        // One transition: the sequence-3 token. Lower sequences discarded.
        assert_eq!(execution.pending_transitions(), 1);
        assert_eq!(dep.last_acted_sequence(), 3);

        let mut builder =
            ripple_core::entry::EntryBuilder::new(ripple_core::entry::MessageEntry::initial());
        for t in execution.take_builders() {
            t(&mut builder);
        }
        let (entry, _) = builder.build();
        assert_eq!(entry.refresh_token().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn late_lower_sequence_is_silently_dropped() {
        let dep = standalone();
        let token_source = SourceId::new();
        let cancel = CancellationToken::new();

        let mut first: FeedExecution<u32> =
            FeedExecution::new(vec![refresh_request(&dep.id, &token_source, 5)]);
        dep.on_executing(&mut first, &cancel).await.unwrap();
        assert_eq!(dep.last_acted_sequence(), 5);

        // A stale in-flight request arriving after: no transition, no error.
        let mut late: FeedExecution<u32> =
            FeedExecution::new(vec![refresh_request(&dep.id, &token_source, 3)]);
        dep.on_executing(&mut late, &cancel).await.unwrap();
        assert_eq!(late.pending_transitions(), 0);
        assert_eq!(dep.last_acted_sequence(), 5);
    }

    #[tokio::test]
    async fn requests_from_other_issuers_are_ignored() {
        let dep = standalone();
        let cancel = CancellationToken::new();
        let other = SourceId::new();

        let mut execution: FeedExecution<u32> =
            FeedExecution::new(vec![refresh_request(&other, &other, 9)]);
        dep.on_executing(&mut execution, &cancel).await.unwrap();
        assert_eq!(execution.pending_transitions(), 0);
    }

    #[tokio::test]
    async fn per_pass_gate_resets_to_default() {
        let dep = standalone();
        let cancel = CancellationToken::new();

        dep.enable();
        assert!(dep.is_enabled());

        let mut execution: FeedExecution<u32> = FeedExecution::new(vec![]);
        dep.on_executing(&mut execution, &cancel).await.unwrap();
        assert!(!dep.is_enabled());
    }

    #[tokio::test]
    async fn persistent_enable_survives_passes() {
        let dep = standalone();
        let cancel = CancellationToken::new();

        dep.enable_until_disabled();
        let mut execution: FeedExecution<u32> = FeedExecution::new(vec![]);
        dep.on_executing(&mut execution, &cancel).await.unwrap();
        assert!(dep.is_enabled());

        dep.disable_until_enabled();
        let mut execution: FeedExecution<u32> = FeedExecution::new(vec![]);
        dep.on_executing(&mut execution, &cancel).await.unwrap();
        assert!(!dep.is_enabled());
    }

    // Integration against a live session.

    fn unit_compute() -> ComputeFn<u32> {
        Arc::new(|_ctx| async { Ok(Some(0)) }.boxed())
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

    #[tokio::test]
    async fn enable_once_honors_exactly_one_request() {
        let session = FeedSession::new(unit_compute());
        let dep = RefreshDependency::attach(&session, false);
        tokio::task::yield_now().await;
        let mut rx = session.subscribe();

        dep.enable();
        let request = session.request_refresh();
        let committed = next_final(&mut rx).await;

        let issued = request.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].sequence, 1);
        assert_eq!(committed.current().refresh_token(), Some(&issued[0]));
        assert_eq!(session.passes_committed(), 1);

        // No intervening enable: the second request produces nothing.
        let second = session.request_refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(second.issued().is_empty());
        assert_eq!(session.passes_committed(), 1);
    }

    #[tokio::test]
    async fn acted_token_is_the_maximum_issued() {
        let session = FeedSession::new(unit_compute());
        let dep = RefreshDependency::attach(&session, true);
        tokio::task::yield_now().await;
        let mut rx = session.subscribe();

        let requests: Vec<_> = (0..4).map(|_| session.request_refresh()).collect();
        // Wait until every request has been honored with a token.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !requests.iter().all(|r| !r.issued().is_empty()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all requests honored");

        // Drain passes until the freshest issued token has been acted on.
        let max_issued = requests
            .iter()
            .flat_map(|r| r.issued())
            .map(|t| t.sequence)
            .max()
            .unwrap();
        let acted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let committed = next_final(&mut rx).await;
                if let Some(token) = committed.current().refresh_token() {
                    if token.sequence == max_issued {
                        return token.clone();
                    }
                }
            }
        })
        .await
        .expect("freshest token acted on");

        assert_eq!(acted.sequence, max_issued);
        assert_eq!(dep.last_acted_sequence(), max_issued);
    }
}
