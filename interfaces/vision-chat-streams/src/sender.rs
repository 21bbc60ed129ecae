use futures_util::Stream;

/// A stream of items from a tokio channel.
///
/// The stream ends once every sender has been dropped and the buffered items are drained.
pub struct ChannelStream<T> {
    receiver: tokio::sync::mpsc::UnboundedReceiver<T>,
}

/// A stream of text from a tokio channel.
pub type ChannelTextStream = ChannelStream<String>;

impl<T> ChannelStream<T> {
    /// Create a new channel and return the sending half with the stream that reads from it.
    pub fn channel() -> (tokio::sync::mpsc::UnboundedSender<T>, Self) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

impl<T> std::fmt::Debug for ChannelStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream").finish()
    }
}

impl<T> From<tokio::sync::mpsc::UnboundedReceiver<T>> for ChannelStream<T> {
    fn from(receiver: tokio::sync::mpsc::UnboundedReceiver<T>) -> Self {
        Self { receiver }
    }
}

impl<T> Stream for ChannelStream<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> core::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn channel_stream_ends_when_senders_drop() {
        let (sender, stream) = ChannelTextStream::channel();
        sender.send("Hello".to_string()).unwrap();
        sender.send(" world".to_string()).unwrap();
        drop(sender);

        let collected: Vec<String> = stream.collect().await;
        assert_eq!(collected, vec!["Hello".to_string(), " world".to_string()]);
    }
}
