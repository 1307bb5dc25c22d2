use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::ids::{RequestId, SourceId};
use crate::token::RefreshToken;

/// A marker pushed onto a session to trigger a new execution pass. The
/// refresh specialization additionally carries the token the issuing
/// dependency produced.
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub id: RequestId,
    pub issuer: SourceId,
    pub reason: String,
    pub refresh: Option<RefreshToken>,
}

impl ExecuteRequest {
    pub fn new(issuer: SourceId, reason: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            issuer,
            reason: reason.into(),
            refresh: None,
        }
    }

    /// A refresh execute request carrying the token to act upon.
    pub fn refresh(issuer: SourceId, token: RefreshToken) -> Self {
        Self {
            id: RequestId::new(),
            issuer,
            reason: "refresh requested".into(),
            refresh: Some(token),
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.refresh.is_some()
    }
}

/// An inbound "please refresh" request broadcast on the session's context
/// bus. Handlers that honor it register the token they issued so the caller
/// can correlate the resulting execution.
#[derive(Clone, Debug)]
pub struct RefreshRequest {
    pub id: RequestId,
    registered: Arc<Mutex<Vec<RefreshToken>>>,
}

impl RefreshRequest {
    pub fn new() -> Self {
        Self {
            id: RequestId::new(),
            registered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a token issued in response to this request.
    pub fn register(&self, token: RefreshToken) {
        self.registered.lock().push(token);
    }

    /// Tokens issued for this request so far, in registration order.
    pub fn issued(&self) -> Vec<RefreshToken> {
        self.registered.lock().clone()
    }
}

impl Default for RefreshRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed inbound requests carried on the session's context bus.
#[derive(Clone, Debug)]
pub enum SessionRequest {
    Refresh(RefreshRequest),
}

impl SessionRequest {
    pub fn request_type(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "refresh",
        }
    }
}

/// The session's ambient request bus. Requests fan out to every subscriber;
/// publishing with no subscribers is not an error (the request is simply
/// unheard).
#[derive(Clone)]
pub struct RequestBus {
    tx: broadcast::Sender<SessionRequest>,
}

impl RequestBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a request. Returns the number of subscribers that will see it.
    pub fn publish(&self, request: SessionRequest) -> usize {
        match self.tx.send(request) {
            Ok(n) => n,
            Err(_) => {
                warn!("no request subscribers — request dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> RequestStream {
        RequestStream {
            inner: BroadcastStream::new(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pin_project! {
    /// A stream of session requests. A lagged subscriber skips the gap with
    /// a warning rather than erroring; the stream ends when the bus closes.
    pub struct RequestStream {
        #[pin]
        inner: BroadcastStream<SessionRequest>,
    }
}

impl Stream for RequestStream {
    type Item = SessionRequest;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(request))) => return Poll::Ready(Some(request)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "request stream lagged, dropped requests");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
