//! Floating emoji reactions.
//!
//! Reactions are appended to `rooms/{id}/emotes` and picked up by every
//! participant, the sender included, through the child-added stream. Each one
//! lives on screen for the configured TTL and is then dropped locally; the
//! append log itself is never pruned.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use watchparty_core::{Emote, Identity, RoomId, keyspace};

use crate::store::{ChildAdded, StoreConnector, StoreError, Subscription, encode};

/// Symbols offered by the reaction picker.
pub const REACTION_PALETTE: [&str; 6] = ["❤️", "😂", "🔥", "😮", "👍", "👏"];

const EVENT_CAPACITY: usize = 64;

/// A reaction currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveReaction {
    /// Push key of the emote.
    pub id: String,
    pub symbol: String,
    pub user_id: Identity,
    /// Horizontal position, in `[10, 90)` percent of the viewport width.
    pub x_percent: f64,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReactionEvent {
    Spawned(ActiveReaction),
    Expired { id: String },
}

struct Board {
    active: Mutex<Vec<ActiveReaction>>,
    events: broadcast::Sender<ReactionEvent>,
    ttl: Duration,
}

impl Board {
    fn spawn(&self, child: ChildAdded) -> Option<ActiveReaction> {
        let emote = match serde_json::from_value::<Emote>(child.value) {
            Ok(emote) => emote,
            Err(err) => {
                tracing::warn!(emote_id = %child.key, error = %err, "Skipping malformed emote");
                return None;
            }
        };

        let reaction = ActiveReaction {
            id: child.key,
            symbol: emote.symbol,
            user_id: emote.user_id,
            x_percent: rand::rng().random_range(10.0..90.0),
            expires_at: Instant::now() + self.ttl,
        };
        self.active.lock().push(reaction.clone());
        let _ = self.events.send(ReactionEvent::Spawned(reaction.clone()));
        Some(reaction)
    }

    fn expire(&self, id: &str) {
        let removed = {
            let mut active = self.active.lock();
            let before = active.len();
            active.retain(|r| r.id != id);
            active.len() != before
        };
        if removed {
            let _ = self.events.send(ReactionEvent::Expired { id: id.to_string() });
        }
    }
}

pub struct ReactionBroadcast {
    store: Arc<dyn StoreConnector>,
    room_id: RoomId,
    self_id: Identity,
    board: Arc<Board>,
    task: Option<JoinHandle<()>>,
}

impl ReactionBroadcast {
    pub fn attach(
        store: Arc<dyn StoreConnector>,
        room_id: RoomId,
        self_id: Identity,
        ttl: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let board = Arc::new(Board {
            active: Mutex::new(Vec::new()),
            events,
            ttl,
        });
        let emotes = store.subscribe_child_added(&keyspace::emotes(&room_id));
        let task = tokio::spawn(run_board(board.clone(), emotes));

        Self {
            store,
            room_id,
            self_id,
            board,
            task: Some(task),
        }
    }

    /// Broadcast a reaction. Blank symbols are ignored and yield `None`.
    pub async fn send(&self, symbol: &str) -> Result<Option<String>, StoreError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Ok(None);
        }
        let emote = Emote::new(self.self_id.clone(), symbol);
        let key = self
            .store
            .push(&keyspace::emotes(&self.room_id), encode(&emote)?)
            .await?;
        Ok(Some(key))
    }

    /// Reactions still on screen.
    pub fn active(&self) -> Vec<ActiveReaction> {
        let now = Instant::now();
        self.board
            .active
            .lock()
            .iter()
            .filter(|r| r.expires_at > now)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReactionEvent> {
        self.board.events.subscribe()
    }

    /// Stop listening; pending expiry timers are cancelled with the listener.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.board.active.lock().clear();
    }
}

impl Drop for ReactionBroadcast {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_board(board: Arc<Board>, mut emotes: Subscription<ChildAdded>) {
    let mut expiries = JoinSet::new();
    loop {
        tokio::select! {
            child = emotes.recv() => {
                let Some(child) = child else { break };
                if let Some(reaction) = board.spawn(child) {
                    let board = board.clone();
                    expiries.spawn(async move {
                        tokio::time::sleep_until(reaction.expires_at).await;
                        board.expire(&reaction.id);
                    });
                }
            }
            Some(_) = expiries.join_next(), if !expiries.is_empty() => {}
        }
    }
}
