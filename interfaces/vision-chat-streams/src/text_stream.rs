//! Streams for text data.

use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;

/// A stream of text chunks that may fail part way through.
pub trait TryTextStream<I: AsRef<str>, E>: Stream<Item = Result<I, E>> {
    /// Turn the stream of chunks into a stream of the full text received so far.
    ///
    /// Errors are passed through unchanged and do not reset the buffer.
    ///
    /// ```rust
    /// # use futures_util::StreamExt;
    /// # use vision_chat_streams::text_stream::TryTextStream;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let chunks = futures_util::stream::iter([Ok::<_, ()>("The"), Ok(" chart"), Ok(" shows")]);
    /// let buffers: Vec<_> = chunks.try_accumulate().collect().await;
    /// assert_eq!(buffers, [Ok("The".to_string()), Ok("The chart".to_string()), Ok("The chart shows".to_string())]);
    /// # }
    /// ```
    fn try_accumulate(self) -> TryAccumulatingStream<Self>
    where
        Self: Sized,
    {
        TryAccumulatingStream::new(self)
    }
}

impl<S: Stream<Item = Result<I, E>>, I: AsRef<str>, E> TryTextStream<I, E> for S {}

pin_project! {
    /// A stream that yields the growing buffer of text after every successful chunk of the backing stream.
    pub struct TryAccumulatingStream<S> {
        #[pin]
        backing: S,
        buffer: String,
    }
}

impl<S> TryAccumulatingStream<S> {
    fn new(backing: S) -> Self {
        Self {
            backing,
            buffer: String::new(),
        }
    }

    /// The text received so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}

impl<S> std::fmt::Debug for TryAccumulatingStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryAccumulatingStream")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl<S: Stream<Item = Result<I, E>>, I: AsRef<str>, E> Stream for TryAccumulatingStream<S> {
    type Item = Result<String, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let projected = self.project();
        match projected.backing.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                projected.buffer.push_str(chunk.as_ref());
                Poll::Ready(Some(Ok(projected.buffer.clone())))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn errors_pass_through_without_resetting() {
        let chunks = futures_util::stream::iter([Ok("a"), Err("boom"), Ok("b")]);
        let results: Vec<Result<String, &str>> = chunks.try_accumulate().collect().await;
        assert_eq!(
            results,
            vec![Ok("a".to_string()), Err("boom"), Ok("ab".to_string())]
        );
    }

    #[tokio::test]
    async fn debug_shows_the_buffer() {
        let mut stream = futures_util::stream::iter([Ok::<_, ()>("partial")]).try_accumulate();
        stream.next().await;
        assert_eq!(
            format!("{stream:?}"),
            r#"TryAccumulatingStream { buffer: "partial", .. }"#
        );
    }
}
