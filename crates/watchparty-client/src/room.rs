//! Room creation, validation and membership.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use watchparty_core::presence::decode_users;
use watchparty_core::{
    Identity, RandomTokenSource, RoomId, RoomRecord, RoomSummary, SessionIdentity, SyncConfig,
    TokenSource, UserRecord, keyspace,
};

use crate::auth::IdentityProvider;
use crate::player::PlaybackElement;
use crate::store::{StoreConnector, StoreError, encode};

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("Creating a room requires a signed-in user")]
    AuthRequired,

    #[error("No free room token after {0} attempts")]
    TokenSpaceExhausted(u32),

    #[error("Room {0} has a malformed record")]
    MalformedRecord(RoomId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the local participant ended up in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new room was written with us as host.
    Created(RoomId),
    /// We are the stored host of an existing room.
    Reclaimed(RoomId),
    /// We joined someone else's room as a viewer.
    Joined(RoomId),
}

impl JoinOutcome {
    pub fn room_id(&self) -> &RoomId {
        match self {
            JoinOutcome::Created(id) | JoinOutcome::Reclaimed(id) | JoinOutcome::Joined(id) => id,
        }
    }

    pub fn is_host(&self) -> bool {
        !matches!(self, JoinOutcome::Joined(_))
    }

    /// Joining viewers snap to the room state once listeners are attached.
    pub fn requires_resync(&self) -> bool {
        matches!(self, JoinOutcome::Joined(_))
    }
}

pub struct RoomManager {
    store: Arc<dyn StoreConnector>,
    auth: Arc<dyn IdentityProvider>,
    player: Arc<dyn PlaybackElement>,
    identity: SessionIdentity,
    tokens: Mutex<Box<dyn TokenSource>>,
    config: SyncConfig,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn StoreConnector>,
        auth: Arc<dyn IdentityProvider>,
        player: Arc<dyn PlaybackElement>,
        identity: SessionIdentity,
        config: SyncConfig,
    ) -> Self {
        let tokens: Box<dyn TokenSource> = Box::new(RandomTokenSource::new(config.room_token_len));
        Self {
            store,
            auth,
            player,
            identity,
            tokens: Mutex::new(tokens),
            config,
        }
    }

    /// Replace the room token generator.
    pub fn with_token_source(self, tokens: Box<dyn TokenSource>) -> Self {
        self.set_token_source(tokens);
        self
    }

    pub fn set_token_source(&self, tokens: Box<dyn TokenSource>) {
        *self.tokens.lock() = tokens;
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Name written into user records and notices: the provider's display
    /// name when signed in with one, otherwise the session's.
    pub fn display_name(&self) -> String {
        self.auth
            .current_user()
            .and_then(|user| user.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.identity.display_name.clone())
    }

    /// Create a room hosted by the local participant, seeded from the player.
    pub async fn create_room(&self, media_id: &str) -> Result<RoomId, RoomError> {
        if self.auth.current_user().is_none() {
            tracing::info!(user_id = %self.identity.id, "Room creation refused: not signed in");
            return Err(RoomError::AuthRequired);
        }

        let room_id = self.allocate_room_id().await?;
        let host = UserRecord::host(self.identity.id.clone(), self.display_name());
        let local = self.player.snapshot();
        let record = RoomRecord::new_hosted(media_id, host, local.is_playing, local.current_time);

        self.store
            .set(&keyspace::room(&room_id), encode(&record)?)
            .await?;

        tracing::info!(room_id = %room_id, user_id = %self.identity.id, media_id, "Room created");
        Ok(room_id)
    }

    /// Enter the room named by a shared link.
    ///
    /// A missing room becomes a new one, a room whose stored host is us is
    /// reclaimed without writing anything, and any other room is joined.
    pub async fn validate_and_join(
        &self,
        room_id: &RoomId,
        media_id: &str,
    ) -> Result<JoinOutcome, RoomError> {
        let Some(record) = self.store.read(&keyspace::room(room_id)).await? else {
            tracing::info!(room_id = %room_id, "Room not found, creating a new one");
            return Ok(JoinOutcome::Created(self.create_room(media_id).await?));
        };

        // A record without a readable host is joined like anyone else's.
        if host_of(&record).is_some_and(|host_id| host_id == self.identity.id) {
            tracing::info!(room_id = %room_id, user_id = %self.identity.id, "Host reclaimed room");
            return Ok(JoinOutcome::Reclaimed(room_id.clone()));
        }

        self.join_room(room_id).await?;
        Ok(JoinOutcome::Joined(room_id.clone()))
    }

    /// Write our viewer record. Joining again resets delegated control.
    pub async fn join_room(&self, room_id: &RoomId) -> Result<(), RoomError> {
        let viewer = UserRecord::viewer(self.identity.id.clone(), self.display_name());
        self.store
            .set(&keyspace::user(room_id, &self.identity.id), encode(&viewer)?)
            .await?;

        tracing::info!(room_id = %room_id, user_id = %self.identity.id, "Joined room as viewer");
        Ok(())
    }

    /// Look at a room without joining it.
    pub async fn peek_room(&self, room_id: &RoomId) -> Result<Option<RoomSummary>, RoomError> {
        let Some(record) = self.store.read(&keyspace::room(room_id)).await? else {
            return Ok(None);
        };

        let malformed = || RoomError::MalformedRecord(room_id.clone());
        let media_id = record
            .get("mediaId")
            .and_then(Value::as_str)
            .ok_or_else(malformed)?;
        let host_id = host_of(&record).ok_or_else(malformed)?;

        Ok(Some(RoomSummary {
            media_id: media_id.to_string(),
            host_id,
            watcher_count: decode_users(record.get(keyspace::USERS)).len(),
        }))
    }

    async fn allocate_room_id(&self) -> Result<RoomId, RoomError> {
        let attempts = self.config.max_token_attempts.max(1);
        for _ in 0..attempts {
            let token = { self.tokens.lock().next_token() };
            let Some(candidate) = RoomId::parse(&token) else {
                tracing::warn!(token = %token, "Token source produced an unusable room token");
                continue;
            };
            if self.store.read(&keyspace::room(&candidate)).await?.is_none() {
                return Ok(candidate);
            }
            tracing::debug!(room_id = %candidate, "Room token already taken");
        }
        Err(RoomError::TokenSpaceExhausted(attempts))
    }
}

fn host_of(record: &Value) -> Option<Identity> {
    record
        .get("hostId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(Identity::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticIdentityProvider;
    use crate::player::SimulatedPlayer;
    use crate::store::MemoryStore;
    use serde_json::json;
    use watchparty_core::{SequenceTokenSource, StorePath};

    fn manager(
        store: &MemoryStore,
        auth: StaticIdentityProvider,
        identity: SessionIdentity,
        tokens: &[&str],
    ) -> RoomManager {
        RoomManager::new(
            Arc::new(store.clone()),
            Arc::new(auth),
            Arc::new(SimulatedPlayer::new()),
            identity,
            SyncConfig::default(),
        )
        .with_token_source(Box::new(SequenceTokenSource::new(tokens.iter().copied())))
    }

    fn alice() -> SessionIdentity {
        SessionIdentity::new("alice-id", "User_321")
    }

    #[tokio::test]
    async fn test_create_requires_auth() {
        let store = MemoryStore::new();
        let rooms = manager(&store, StaticIdentityProvider::anonymous(), alice(), &["r1"]);

        let err = rooms.create_room("movie").await.unwrap_err();
        assert!(matches!(err, RoomError::AuthRequired));
        assert_eq!(store.dump(), Value::Null);
    }

    #[tokio::test]
    async fn test_create_writes_full_record() {
        let store = MemoryStore::new();
        let rooms = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", Some("Alice")),
            alice(),
            &["r1"],
        );

        let room_id = rooms.create_room("movie").await.unwrap();
        assert_eq!(room_id, RoomId::new("r1"));

        let room = &store.dump()["rooms"]["r1"];
        assert_eq!(room["hostId"], json!("alice-id"));
        assert_eq!(room["mediaId"], json!("movie"));
        assert_eq!(room["state"]["isPlaying"], json!(false));
        assert_eq!(room["state"]["currentTime"], json!(0.0));
        assert_eq!(room["state"]["updatedBy"], json!("alice-id"));
        assert!(room["state"]["lastUpdated"].is_i64());
        assert_eq!(room["users"]["alice-id"]["displayName"], json!("Alice"));
        assert_eq!(room["users"]["alice-id"]["permissions"]["canControl"], json!(true));
    }

    #[tokio::test]
    async fn test_create_skips_taken_tokens() {
        let store = MemoryStore::new();
        store
            .set(&StorePath::parse("rooms/taken"), json!({"hostId": "someone"}))
            .await
            .unwrap();
        let rooms = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["taken", "free"],
        );

        assert_eq!(rooms.create_room("m").await.unwrap(), RoomId::new("free"));
        // Display name falls back to the session's.
        assert_eq!(
            store.dump()["rooms"]["free"]["users"]["alice-id"]["displayName"],
            json!("User_321")
        );
    }

    #[tokio::test]
    async fn test_create_gives_up_when_every_token_collides() {
        let store = MemoryStore::new();
        store
            .set(&StorePath::parse("rooms/same"), json!({"hostId": "someone"}))
            .await
            .unwrap();
        let rooms = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["same"; 5],
        );

        let err = rooms.create_room("m").await.unwrap_err();
        assert!(matches!(err, RoomError::TokenSpaceExhausted(5)));
    }

    #[tokio::test]
    async fn test_validate_missing_room_creates() {
        let store = MemoryStore::new();
        let rooms = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["fresh"],
        );

        let outcome = rooms
            .validate_and_join(&RoomId::new("gone"), "movie")
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Created(RoomId::new("fresh")));
        assert!(outcome.is_host());
        assert!(!outcome.requires_resync());
    }

    #[tokio::test]
    async fn test_validate_reclaims_without_writing() {
        let store = MemoryStore::new();
        let host = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["r1"],
        );
        let room_id = host.create_room("movie").await.unwrap();
        let before = store.dump();

        // Same persisted identity, not signed in this time.
        let returning = manager(&store, StaticIdentityProvider::anonymous(), alice(), &[]);
        let outcome = returning.validate_and_join(&room_id, "movie").await.unwrap();

        assert_eq!(outcome, JoinOutcome::Reclaimed(room_id));
        assert_eq!(store.dump(), before);
    }

    #[tokio::test]
    async fn test_validate_joins_as_viewer() {
        let store = MemoryStore::new();
        let host = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["r1"],
        );
        let room_id = host.create_room("movie").await.unwrap();

        let bob = manager(
            &store,
            StaticIdentityProvider::anonymous(),
            SessionIdentity::new("bob-id", "Bob"),
            &[],
        );
        let outcome = bob.validate_and_join(&room_id, "movie").await.unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(room_id.clone()));
        assert!(outcome.requires_resync());

        let user = &store.dump()["rooms"]["r1"]["users"]["bob-id"];
        assert_eq!(user["role"], json!("viewer"));
        assert_eq!(user["permissions"]["canControl"], json!(false));

        let summary = bob.peek_room(&room_id).await.unwrap().unwrap();
        assert_eq!(summary.media_id, "movie");
        assert_eq!(summary.host_id, Identity::from("alice-id"));
        assert_eq!(summary.watcher_count, 2);
    }

    #[tokio::test]
    async fn test_room_without_host_is_joined() {
        let store = MemoryStore::new();
        store
            .set(
                &StorePath::parse("rooms/r9"),
                json!({"mediaId": "m", "state": {"isPlaying": false, "currentTime": 3.0}}),
            )
            .await
            .unwrap();
        let rooms = manager(&store, StaticIdentityProvider::anonymous(), alice(), &[]);

        let outcome = rooms
            .validate_and_join(&RoomId::new("r9"), "m")
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(RoomId::new("r9")));
        assert_eq!(
            store.dump()["rooms"]["r9"]["users"]["alice-id"]["role"],
            json!("viewer")
        );

        // Peeking still needs a host to report.
        let err = rooms.peek_room(&RoomId::new("r9")).await.unwrap_err();
        assert!(matches!(err, RoomError::MalformedRecord(_)));
        assert!(rooms.peek_room(&RoomId::new("none")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        let rooms = manager(
            &store,
            StaticIdentityProvider::signed_in("uid", None),
            alice(),
            &["r1"],
        );

        let err = rooms.create_room("m").await.unwrap_err();
        assert!(matches!(err, RoomError::Store(StoreError::Unavailable(_))));
    }
}
