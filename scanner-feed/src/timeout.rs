//! Idle timeout for the quote stream.
//!
//! A quote WebSocket can die silently: the TCP connection stays open but no frames
//! arrive. [`TimeoutStream`] ends the wrapped stream once nothing has been received for
//! the configured period, which sends the client back into its reconnect loop.

use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Instant, Sleep};

/// Default idle period after which the quote stream is considered dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<Sleep>>,
    timed_out: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            timed_out: false,
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_READ_TIMEOUT)
    }

    /// Whether the stream ended because of the idle timeout rather than the inner stream.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.timed_out {
            return Poll::Ready(None);
        }

        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "quote stream read timeout, no data received"
                    );
                    self.timed_out = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
