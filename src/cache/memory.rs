use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::SharedCache;
use crate::error::AppError;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    /// Kept sorted ascending by (score, member).
    Sorted(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process stand-in for the shared cache.
///
/// Expiry follows tokio's clock, so paused-time tests can step past a TTL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|entry| entry.is_live(now))
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.purge_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(Value::Sorted(_)) => Err(AppError::Infrastructure(format!(
                "key {key} holds a sorted set"
            ))),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        self.purge_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn push_capped(&self, key: &str, score: i64, member: &str, cap: usize) -> Result<(), AppError> {
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(Vec::new()),
            expires_at: None,
        });

        let Value::Sorted(members) = &mut entry.value else {
            return Err(AppError::Infrastructure(format!("key {key} is not a sorted set")));
        };

        members.retain(|(_, existing)| existing != member);
        let item = (score, member.to_string());
        let position = members.partition_point(|existing| existing < &item);
        members.insert(position, item);

        if members.len() > cap {
            let excess = members.len() - cap;
            members.drain(..excess);
        }

        Ok(())
    }

    async fn newest(&self, key: &str, limit: usize) -> Result<Vec<String>, AppError> {
        self.purge_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::Sorted(members)) => Ok(members
                .into_iter()
                .rev()
                .take(limit)
                .map(|(_, member)| member)
                .collect()),
            Some(Value::Text(_)) => Err(AppError::Infrastructure(format!(
                "key {key} is not a sorted set"
            ))),
            None => Ok(Vec::new()),
        }
    }
}
