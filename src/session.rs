//! Server-side sessions keyed by an opaque id carried in a cookie.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use fred::{clients::RedisClient, interfaces::KeysInterface, types::Expiration};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

pub const SESSION_COOKIE: &str = "babblr.sid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session for `id` unless it is missing or expired.
    async fn load(&self, id: &str) -> Result<Option<Session>>;

    /// Stores `session` under `id` and restarts its lifetime.
    async fn save(&self, id: &str, session: &Session) -> Result<()>;

    async fn destroy(&self, id: &str) -> Result<()>;
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn session_cookie(id: &str, ttl: Duration) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        id,
        ttl.as_secs()
    )
}

pub fn expired_cookie() -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    )
}

#[derive(Debug)]
pub struct MemorySessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, (Session, Instant)>>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::default(),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let now = Instant::now();
        if let Some((session, deadline)) = self.sessions.read().await.get(id) {
            if *deadline > now {
                return Ok(Some(session.clone()));
            }
        } else {
            return Ok(None);
        }

        // expired, drop it
        self.sessions.write().await.remove(id);
        Ok(None)
    }

    async fn save(&self, id: &str, session: &Session) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        // drop expired sessions on the way
        sessions.retain(|_, (_, deadline)| *deadline > now);
        sessions.insert(id.to_owned(), (session.clone(), now + self.ttl));
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

#[derive(Debug)]
pub struct RedisSessionStore {
    client: RedisClient,
    ttl: Duration,
}

impl RedisSessionStore {
    pub fn new(client: RedisClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    fn key(id: &str) -> String {
        format!("session:{}", id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let raw = self.client.get::<Option<String>, _>(Self::key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, session: &Session) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        // redis rejects EX 0
        let secs = self.ttl.as_secs().max(1) as i64;
        self.client
            .set::<(), _, _>(Self::key(id), payload, Some(Expiration::EX(secs)), None, false)
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.client.del::<i64, _>(Self::key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        expired_cookie, new_session_id, session_cookie, MemorySessionStore, Session,
        SessionStore,
    };

    fn bob() -> Session {
        Session {
            username: "bobsmith".to_owned(),
        }
    }

    #[tokio::test]
    async fn memory_sessions() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let id = new_session_id();

        assert_eq!(store.load(&id).await.unwrap(), None);
        store.save(&id, &bob()).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), Some(bob()));

        // other ids see nothing
        assert_eq!(store.load(&new_session_id()).await.unwrap(), None);

        store.destroy(&id).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), None);
        store.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn memory_sessions_expire() {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        let id = new_session_id();

        store.save(&id, &bob()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.load(&id).await.unwrap(), None);
        assert!(store.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn save_sweeps_expired_sessions() {
        let store = MemorySessionStore::new(Duration::from_millis(1));
        for _ in 0..100 {
            store.save(&new_session_id(), &bob()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let id = new_session_id();
        store.save(&id, &bob()).await.unwrap();
        let sessions = store.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key(&id));
    }

    #[test]
    fn cookies() {
        let id = new_session_id();
        assert_eq!(id.len(), 32);
        assert_ne!(id, new_session_id());

        let cookie = session_cookie(&id, Duration::from_secs(86400));
        assert!(cookie.starts_with(&format!("babblr.sid={};", id)));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("Max-Age=86400"));

        assert!(expired_cookie().starts_with("babblr.sid=;"));
        assert!(expired_cookie().ends_with("Max-Age=0"));
    }
}
