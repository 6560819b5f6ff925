//! Persistence for chat messages.
//!
//! Messages live in a single append-only list. Reads use Redis `LRANGE`
//! indexing for both backends: inclusive bounds, negative indexes count
//! back from the tail.

use std::ops::Range;

use async_trait::async_trait;
use fred::{
    clients::RedisClient,
    interfaces::{ClientLike, ListInterface},
    types::RedisConfig,
};
use tokio::sync::RwLock;

use crate::error::Result;

/// Key of the list holding every sent message.
pub const MESSAGES_KEY: &str = "chat:messages";

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends `text` to the tail and returns the new length.
    async fn append(&self, text: &str) -> Result<usize>;

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>>;
}

/// Connects a client and waits for the first connection to come up.
pub async fn connect(url: &str) -> Result<RedisClient> {
    let client = RedisClient::new(RedisConfig::from_url(url)?, None, None, None);
    client.init().await?;
    Ok(client)
}

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<String>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, text: &str) -> Result<usize> {
        let mut messages = self.messages.write().await;
        messages.push(text.to_owned());
        Ok(messages.len())
    }

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>> {
        let messages = self.messages.read().await;
        Ok(match resolve_range(messages.len(), start, stop) {
            Some(range) => messages[range].to_vec(),
            None => Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct RedisMessageStore {
    client: RedisClient,
    key: String,
}

impl RedisMessageStore {
    pub fn new(client: RedisClient) -> Self {
        Self::with_key(client, MESSAGES_KEY)
    }

    pub fn with_key(client: RedisClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }
}

#[async_trait]
impl MessageStore for RedisMessageStore {
    async fn append(&self, text: &str) -> Result<usize> {
        let len = self.client.rpush::<i64, _, _>(self.key.as_str(), text).await?;
        Ok(len as usize)
    }

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .client
            .lrange::<Vec<String>, _>(self.key.as_str(), start, stop)
            .await?)
    }
}

/// Maps inclusive `LRANGE` bounds onto a slice range of a list of `len`
/// items. `None` means the range selects nothing.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start >= len || stop < 0 || start > stop {
        return None;
    }

    Some(start as usize..stop as usize + 1)
}
