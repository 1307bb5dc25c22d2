use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::FeedError;

/// A sequence of refresh ticks.
pub type SignalStream = BoxStream<'static, ()>;

/// A push-based external stimulus (timer, connectivity change, …): produce a
/// sequence of ticks given a cancellation scope, completing when the source
/// is done. Subscribed at most once per consumer.
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    fn subscribe(&self, cancel: CancellationToken) -> Result<SignalStream, FeedError>;
}

/// A channel-backed signal for tests and in-process sources. Ticks are
/// pushed with `tick`; `complete` ends the stream. A second `subscribe`
/// fails — the receiver half is single-use.
pub struct ChannelSignal {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl ChannelSignal {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Push one tick. Returns false once the signal has completed or the
    /// subscriber is gone.
    pub fn tick(&self) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Complete the signal: the subscribed stream ends after draining.
    pub fn complete(&self) {
        self.tx.lock().take();
    }
}

impl Signal for ChannelSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, cancel: CancellationToken) -> Result<SignalStream, FeedError> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| FeedError::Signal(format!("signal {} already subscribed", self.name)))?;
        Ok(UnboundedReceiverStream::new(rx)
            .take_until(cancel.cancelled_owned())
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticks_flow_until_complete() {
        let signal = ChannelSignal::new("timer");
        let mut stream = signal.subscribe(CancellationToken::new()).unwrap();

        assert!(signal.tick());
        assert!(signal.tick());
        signal.complete();
        assert!(!signal.tick());

        assert_eq!(stream.next().await, Some(()));
        assert_eq!(stream.next().await, Some(()));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn second_subscribe_fails() {
        let signal = ChannelSignal::new("timer");
        let _stream = signal.subscribe(CancellationToken::new()).unwrap();
        let err = signal.subscribe(CancellationToken::new()).err().unwrap();
        assert_eq!(err.kind(), "signal");
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let signal = ChannelSignal::new("connectivity");
        let cancel = CancellationToken::new();
        let mut stream = signal.subscribe(cancel.clone()).unwrap();

        cancel.cancel();
        assert_eq!(stream.next().await, None);
        // Ticks after cancellation go nowhere but do not error the sender
        // until the signal completes.
        assert!(signal.tick());
    }
}
