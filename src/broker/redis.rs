use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::broker::{Broker, BrokerMessage};
use crate::error::AppError;

/// Redis pub/sub. Publishing goes through the shared connection manager;
/// every pattern subscription opens its own dedicated connection, as Redis
/// requires.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBroker {
    pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
        Self { client, conn }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BoxStream<'static, BrokerMessage>, AppError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(BrokerMessage { channel, payload }),
                Err(err) => {
                    warn!(channel = %channel, error = %err, "dropping non-text broker payload");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
