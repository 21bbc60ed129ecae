//! Streams that stop waiting when the producer goes quiet.

use futures_util::{Future, Stream};
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Sleep;

/// The error returned when a [`TimeoutStream`] waited too long for the next item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// How long the stream waited before giving up.
    pub waited: Duration,
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no item received within {:?}", self.waited)
    }
}

impl std::error::Error for Elapsed {}

/// Adds [`StreamTimeoutExt::with_timeout`] to every stream.
pub trait StreamTimeoutExt: Stream {
    /// Fail the stream if the next item does not arrive within `timeout`.
    ///
    /// The timer starts the first time the stream has to wait and restarts after every item. Once
    /// the timer fires the stream yields one [`Elapsed`] error and then ends.
    fn with_timeout(self, timeout: Duration) -> TimeoutStream<Self>
    where
        Self: Sized,
    {
        TimeoutStream::new(self, timeout)
    }
}

impl<S: Stream> StreamTimeoutExt for S {}

pin_project! {
    /// A stream that fails if the backing stream does not produce an item in time.
    pub struct TimeoutStream<S> {
        #[pin]
        backing: S,
        deadline: Option<Pin<Box<Sleep>>>,
        timeout: Duration,
        finished: bool,
    }
}

impl<S> TimeoutStream<S> {
    fn new(backing: S, timeout: Duration) -> Self {
        Self {
            backing,
            deadline: None,
            timeout,
            finished: false,
        }
    }
}

impl<S: Stream> Stream for TimeoutStream<S> {
    type Item = Result<S::Item, Elapsed>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let projected = self.project();
        if *projected.finished {
            return Poll::Ready(None);
        }
        match projected.backing.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                *projected.deadline = None;
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(None) => {
                *projected.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                let timeout = *projected.timeout;
                let deadline = projected
                    .deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                match deadline.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        *projected.finished = true;
                        Poll::Ready(Some(Err(Elapsed { waited: timeout })))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}
