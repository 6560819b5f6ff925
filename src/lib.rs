use std::{
    collections::HashMap,
    convert::TryFrom,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt, TryFutureExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod store;
pub mod views;

pub use error::{Error, Result};

use config::Config;
use events::{ClientEvent, ServerEvent};
use session::{MemorySessionStore, RedisSessionStore, SessionStore};
use store::{MemoryMessageStore, MessageStore, RedisMessageStore};

/// Our global unique user id counter.
static NEXT_USER_ID: AtomicUsize = AtomicUsize::new(1);

/// Our state of currently connected users.
///
/// - Key is their id
/// - Value is a sender of `warp::ws::Message`
pub type Users = Arc<RwLock<HashMap<usize, mpsc::UnboundedSender<Message>>>>;

/// The single chat room every socket joins.
///
/// Sent messages are persisted to the store first and then pushed to every
/// connected user, the sender included.
pub struct ChatRoom {
    pub users: Users,
    store: Arc<dyn MessageStore>,
    history: usize,
}

impl ChatRoom {
    /// `history` is how many of the newest messages a new user is sent on
    /// connect.
    pub fn new(store: Arc<dyn MessageStore>, history: usize) -> ChatRoom {
        ChatRoom {
            users: Users::default(),
            store,
            history,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Newest messages, oldest first.
    pub async fn history(&self) -> Result<Vec<String>> {
        if self.history == 0 {
            return Ok(Vec::new());
        }
        let count = i64::try_from(self.history).unwrap_or(i64::MAX);
        self.store.range(-count, -1).await
    }

    pub async fn publish(&self, text: &str) {
        // Held until the broadcast is done so a joining user either finds
        // the message in its history or receives it live.
        let users = self.users.read().await;

        if let Err(e) = self.store.append(text).await {
            error!("failed to persist message: {}", e);
        }

        let frame = match message_frame(text) {
            Some(frame) => frame,
            None => return,
        };
        for tx in users.values() {
            if let Err(_disconnected) = tx.send(frame.clone()) {
                // The tx is disconnected, our `user_disconnected` code
                // should be happening in another task, nothing more to
                // do here.
            }
        }
    }

    /// Sends the user the room's history, then adds them to the room.
    pub async fn join(&self, id: usize, tx: mpsc::UnboundedSender<Message>) {
        let mut users = self.users.write().await;

        match self.history().await {
            Ok(history) => {
                for text in history {
                    let frame = match message_frame(&text) {
                        Some(frame) => frame,
                        None => continue,
                    };
                    if tx.send(frame).is_err() {
                        warn!("user {} left while catching up", id);
                        break;
                    }
                }
            }
            Err(e) => error!("failed to load history for user {}: {}", id, e),
        }

        users.insert(id, tx);
    }
}

fn message_frame(text: &str) -> Option<Message> {
    match ServerEvent::Message(text).to_json() {
        Ok(json) => Some(Message::text(json)),
        Err(e) => {
            error!("failed to encode message: {}", e);
            None
        }
    }
}

pub async fn user_connected(ws: WebSocket, room: Arc<ChatRoom>) {
    // Use a counter to assign a new unique ID for this user.
    let my_id = NEXT_USER_ID.fetch_add(1, Ordering::Relaxed);

    info!("new chat user: {}", my_id);

    // Split the socket into a sender and receive of messages.
    let (mut user_ws_tx, mut user_ws_rx) = ws.split();

    // Use an unbounded channel to handle buffering and flushing of messages
    // to the websocket...
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            user_ws_tx
                .send(message)
                .unwrap_or_else(|e| {
                    warn!("websocket send error: {}", e);
                })
                .await;
        }
    });

    // Catch the user up, then save the sender in our list of connected
    // users.
    room.join(my_id, tx).await;

    // Every time the user sends a message, broadcast it to
    // all users...
    while let Some(result) = user_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("websocket error(uid={}): {}", my_id, e);
                break;
            }
        };
        user_message(my_id, msg, &room).await;
    }

    // user_ws_rx stream will keep processing as long as the user stays
    // connected. Once they disconnect, then...
    user_disconnected(my_id, &room.users).await;
}

async fn user_message(my_id: usize, msg: Message, room: &ChatRoom) {
    // Skip any non-Text messages...
    let msg = if let Ok(s) = msg.to_str() {
        s
    } else {
        return;
    };

    match serde_json::from_str::<ClientEvent>(msg) {
        Ok(ClientEvent::Send { message }) => {
            debug!("user {} sent {} bytes", my_id, message.len());
            room.publish(&message).await;
        }
        Err(e) => warn!("ignoring frame from user {}: {}", my_id, e),
    }
}

async fn user_disconnected(my_id: usize, users: &Users) {
    info!("good bye user: {}", my_id);

    // Stream closed up, so remove from the user list
    users.write().await.remove(&my_id);
}

/// Everything the routes need, cheap to clone into each filter.
#[derive(Clone)]
pub struct AppState {
    pub room: Arc<ChatRoom>,
    pub sessions: Arc<dyn SessionStore>,
    pub session_ttl: Duration,
}

impl AppState {
    pub fn in_memory(session_ttl: Duration, history: usize) -> AppState {
        AppState {
            room: Arc::new(ChatRoom::new(
                Arc::new(MemoryMessageStore::default()),
                history,
            )),
            sessions: Arc::new(MemorySessionStore::new(session_ttl)),
            session_ttl,
        }
    }

    /// Builds the state described by `config`, backed by redis when a url
    /// is configured.
    pub async fn from_config(config: &Config) -> Result<AppState> {
        let url = match &config.redis_url {
            Some(url) => url,
            None => {
                warn!("no redis url configured, messages and sessions stay in memory");
                return Ok(AppState::in_memory(config.session_ttl, config.history));
            }
        };

        let client = store::connect(url).await?;
        info!("connected to redis at {}", url);

        Ok(AppState {
            room: Arc::new(ChatRoom::new(
                Arc::new(RedisMessageStore::new(client.clone())),
                config.history,
            )),
            sessions: Arc::new(RedisSessionStore::new(client, config.session_ttl)),
            session_ttl: config.session_ttl,
        })
    }

    /// Handle of the user owning session `sid`, if any.
    pub async fn current_user(&self, sid: Option<&str>) -> Result<Option<String>> {
        match sid {
            Some(sid) => Ok(self.sessions.load(sid).await?.map(|s| s.username)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    use crate::{
        error::unavailable,
        store::{MemoryMessageStore, MessageStore},
        AppState, ChatRoom, Result,
    };

    fn frame(text: &str) -> Message {
        Message::text(format!(r#"{{"event":"message","data":"{}"}}"#, text))
    }

    /// Memory store whose reads take a while.
    #[derive(Default)]
    struct SlowReads(MemoryMessageStore);

    #[async_trait]
    impl MessageStore for SlowReads {
        async fn append(&self, text: &str) -> Result<usize> {
            self.0.append(text).await
        }

        async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.range(start, stop).await
        }
    }

    struct Unreachable;

    #[async_trait]
    impl MessageStore for Unreachable {
        async fn append(&self, _: &str) -> Result<usize> {
            Err(unavailable())
        }

        async fn range(&self, _: i64, _: i64) -> Result<Vec<String>> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn publish_persists_then_reaches_every_user() {
        let room = ChatRoom::new(Arc::new(MemoryMessageStore::default()), 10);
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        room.users.write().await.insert(1, tx_a);
        room.users.write().await.insert(2, tx_b);

        room.publish("hello").await;

        let expected = Message::text(r#"{"event":"message","data":"hello"}"#);
        assert_eq!(rx_a.recv().await.unwrap(), expected);
        assert_eq!(rx_b.recv().await.unwrap(), expected);
        assert_eq!(room.store().range(0, -1).await.unwrap(), vec!["hello"]);
    }

    #[tokio::test]
    async fn history_is_newest_messages_oldest_first() {
        let room = ChatRoom::new(Arc::new(MemoryMessageStore::default()), 2);
        for text in &["one", "two", "three"] {
            room.publish(text).await;
        }
        assert_eq!(room.history().await.unwrap(), vec!["two", "three"]);

        let room = ChatRoom::new(room.store().clone(), 0);
        assert!(room.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn current_user_needs_a_live_session() {
        let state = AppState::in_memory(Duration::from_secs(60), 0);
        assert_eq!(state.current_user(None).await.unwrap(), None);
        assert_eq!(state.current_user(Some("nope")).await.unwrap(), None);

        state
            .sessions
            .save(
                "abc",
                &crate::session::Session {
                    username: "bobsmith".to_owned(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            state.current_user(Some("abc")).await.unwrap().as_deref(),
            Some("bobsmith")
        );
    }

    #[tokio::test]
    async fn message_sent_while_joining_is_delivered_once() {
        let room = Arc::new(ChatRoom::new(Arc::new(SlowReads::default()), 10));
        room.publish("before").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let joining = {
            let room = room.clone();
            tokio::spawn(async move { room.join(7, tx).await })
        };

        // lands while the join is still reading history
        tokio::time::sleep(Duration::from_millis(10)).await;
        room.publish("during").await;
        joining.await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), frame("before"));
        assert_eq!(rx.recv().await.unwrap(), frame("during"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broken_store_still_broadcasts() {
        let room = ChatRoom::new(Arc::new(Unreachable), 10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // history fails, the user still joins
        room.join(1, tx).await;
        assert_eq!(room.users.read().await.len(), 1);

        room.publish("still here").await;
        assert_eq!(rx.recv().await.unwrap(), frame("still here"));
        assert!(room.history().await.is_err());
    }

    #[tokio::test]
    async fn huge_history_reads_everything() {
        let room = ChatRoom::new(Arc::new(MemoryMessageStore::default()), usize::MAX);
        room.publish("one").await;
        room.publish("two").await;
        assert_eq!(room.history().await.unwrap(), vec!["one", "two"]);
    }
}
