//! Bridges a blocking generation call to an async stream of text.

use crate::{StreamClosed, TokenDecoder, TokenStreamer};
use futures_util::Stream;
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use vision_chat_streams::{
    timed_stream::{StreamTimeoutExt, TimeoutStream},
    ChannelStream,
};

/// An error while reading a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The model did not produce any text for too long.
    #[error("No text was generated within {0:?}")]
    Timeout(Duration),
    /// Generation failed part way through.
    #[error("Generation failed: {0}")]
    Generation(String),
    /// The generation thread stopped without finishing the response.
    #[error("The generation thread stopped unexpectedly")]
    Disconnected,
}

enum StreamMessage {
    Text(String),
    Failed(String),
    End,
}

/// Receives token ids from a model, decodes them incrementally, and sends finished pieces of text
/// to a [`TextIteratorStream`].
///
/// Text is only released once it is final: everything up to a newline, everything if it ends in
/// a CJK character, and otherwise everything up to the last space. Text that ends in an
/// incomplete UTF-8 sequence is held back until the next token completes it.
pub struct TextIteratorStreamer {
    decoder: Arc<dyn TokenDecoder>,
    sender: tokio::sync::mpsc::UnboundedSender<StreamMessage>,
    skip_prompt: bool,
    skip_special_tokens: bool,
    next_tokens_are_prompt: bool,
    token_cache: Vec<u32>,
    print_len: usize,
    finished: bool,
}

impl std::fmt::Debug for TextIteratorStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextIteratorStreamer")
            .field("skip_prompt", &self.skip_prompt)
            .field("skip_special_tokens", &self.skip_special_tokens)
            .field("token_cache", &self.token_cache)
            .field("print_len", &self.print_len)
            .finish()
    }
}

impl TextIteratorStreamer {
    /// Create a streamer and the stream that reads from it. The stream fails if no text arrives
    /// within `timeout`.
    ///
    /// By default the prompt and special tokens are skipped.
    pub fn new(decoder: Arc<dyn TokenDecoder>, timeout: Duration) -> (Self, TextIteratorStream) {
        let (sender, stream) = ChannelStream::channel();
        let streamer = Self {
            decoder,
            sender,
            skip_prompt: true,
            skip_special_tokens: true,
            next_tokens_are_prompt: true,
            token_cache: Vec::new(),
            print_len: 0,
            finished: false,
        };
        let stream = TextIteratorStream {
            inner: stream.with_timeout(timeout),
            finished: false,
        };
        (streamer, stream)
    }

    /// Set whether the first batch of tokens (the prompt) is skipped.
    pub fn with_skip_prompt(mut self, skip_prompt: bool) -> Self {
        self.skip_prompt = skip_prompt;
        self
    }

    /// Set whether special tokens are removed while decoding.
    pub fn with_skip_special_tokens(mut self, skip_special_tokens: bool) -> Self {
        self.skip_special_tokens = skip_special_tokens;
        self
    }

    /// Returns true if [`TokenStreamer::end`] was called since the last tokens were pushed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Report a failure to the reader of the stream. The stream ends after the error.
    pub fn fail(&mut self, error: impl std::fmt::Display) {
        let _ = self.sender.send(StreamMessage::Failed(error.to_string()));
    }

    fn decode_cache(&mut self) -> Result<String, StreamClosed> {
        match self
            .decoder
            .decode(&self.token_cache, self.skip_special_tokens)
        {
            Ok(text) => Ok(text),
            Err(err) => {
                tracing::warn!("Failed to decode generated tokens: {err}");
                self.fail(format!("failed to decode generated tokens: {err}"));
                Err(StreamClosed)
            }
        }
    }

    fn send(&self, text: String) -> Result<(), StreamClosed> {
        if self.sender.is_closed() {
            return Err(StreamClosed);
        }
        if !text.is_empty() {
            tracing::trace!("Streaming {text:?}");
            self.sender
                .send(StreamMessage::Text(text))
                .map_err(|_| StreamClosed)?;
        }
        Ok(())
    }
}

impl TokenStreamer for TextIteratorStreamer {
    fn put(&mut self, ids: &[u32]) -> Result<(), StreamClosed> {
        self.finished = false;
        if self.skip_prompt && self.next_tokens_are_prompt {
            self.next_tokens_are_prompt = false;
            return self.send(String::new());
        }

        self.token_cache.extend_from_slice(ids);
        let text = self.decode_cache()?;

        let printable = if text.ends_with('\n') {
            let printable = unprinted(&text, self.print_len, text.len()).to_string();
            self.token_cache.clear();
            self.print_len = 0;
            printable
        } else if text.ends_with('\u{FFFD}') {
            String::new()
        } else if text.chars().last().is_some_and(is_cjk) {
            let printable = unprinted(&text, self.print_len, text.len()).to_string();
            self.print_len = text.len();
            printable
        } else {
            let end = text.rfind(' ').map(|index| index + 1).unwrap_or(0);
            let printable = unprinted(&text, self.print_len, end).to_string();
            self.print_len = self.print_len.max(end);
            printable
        };

        self.send(printable)
    }

    fn end(&mut self) -> Result<(), StreamClosed> {
        let printable = if self.token_cache.is_empty() {
            String::new()
        } else {
            let text = self.decode_cache()?;
            let printable = unprinted(&text, self.print_len, text.len()).to_string();
            self.token_cache.clear();
            self.print_len = 0;
            printable
        };
        self.next_tokens_are_prompt = true;
        self.finished = true;

        self.send(printable)?;
        self.sender
            .send(StreamMessage::End)
            .map_err(|_| StreamClosed)
    }
}

/// The part of `text` in `from..to` that has not been printed yet, clamped to char boundaries.
fn unprinted(text: &str, from: usize, to: usize) -> &str {
    let to = to.min(text.len());
    let from = (from..=to)
        .find(|index| text.is_char_boundary(*index))
        .unwrap_or(to);
    text.get(from..to).unwrap_or("")
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}

pin_project! {
    /// The reading half of a [`TextIteratorStreamer`]: a stream of finished pieces of text.
    ///
    /// The stream ends when the streamer signals the end of generation. It yields one error and
    /// ends if generation fails, the producer disappears, or no text arrives in time.
    pub struct TextIteratorStream {
        #[pin]
        inner: TimeoutStream<ChannelStream<StreamMessage>>,
        finished: bool,
    }
}

impl std::fmt::Debug for TextIteratorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextIteratorStream")
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for TextIteratorStream {
    type Item = Result<String, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let projected = self.project();
        if *projected.finished {
            return Poll::Ready(None);
        }
        let item = match projected.inner.poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(item) => item,
        };
        match item {
            Some(Ok(StreamMessage::Text(text))) => Poll::Ready(Some(Ok(text))),
            Some(Ok(StreamMessage::End)) => {
                *projected.finished = true;
                Poll::Ready(None)
            }
            Some(Ok(StreamMessage::Failed(message))) => {
                *projected.finished = true;
                Poll::Ready(Some(Err(StreamError::Generation(message))))
            }
            Some(Err(elapsed)) => {
                *projected.finished = true;
                Poll::Ready(Some(Err(StreamError::Timeout(elapsed.waited))))
            }
            None => {
                *projected.finished = true;
                Poll::Ready(Some(Err(StreamError::Disconnected)))
            }
        }
    }
}
