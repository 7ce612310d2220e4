//! Cross-process publish/subscribe.
//!
//! A [`Broker`] is a best-effort pub/sub primitive: no acknowledgement, no
//! replay, at-most-once delivery to whoever is subscribed at publish time.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AppError;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError>;

    /// Subscribes to every channel matching `pattern` (`*` wildcard). The
    /// subscription is live once this returns.
    async fn psubscribe(&self, pattern: &str) -> Result<BoxStream<'static, BrokerMessage>, AppError>;
}

/// Glob match supporting a single `*`, which is all the channel scheme needs.
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == channel,
        Some((prefix, suffix)) => {
            channel.len() >= prefix.len() + suffix.len()
                && channel.starts_with(prefix)
                && channel.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pattern_matches;

    #[test]
    fn wildcard_matches_middle_segment() {
        assert!(pattern_matches("tracking:*:events", "tracking:DLV-20261018-1A2B3C4D:events"));
        assert!(!pattern_matches("tracking:*:events", "tracking:DLV-20261018-1A2B3C4D:history"));
        assert!(!pattern_matches("tracking:*:events", "tracking:events"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
    }
}
