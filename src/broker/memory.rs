use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::broker::{pattern_matches, Broker, BrokerMessage};
use crate::error::AppError;

/// In-process broker. Clones share the same bus, so two bridges holding
/// clones of one `MemoryBroker` behave like two servers on one Redis.
#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self { tx }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        // No receivers is not an error for pub/sub.
        let _ = self.tx.send(BrokerMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BoxStream<'static, BrokerMessage>, AppError> {
        let pattern = pattern.to_string();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |result| match result {
            Ok(message) if pattern_matches(&pattern, &message.channel) => Some(message),
            _ => None,
        });

        Ok(Box::pin(stream))
    }
}
