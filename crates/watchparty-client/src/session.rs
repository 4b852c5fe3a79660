//! Session lifecycle: from page load to teardown.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use url::Url;
use watchparty_core::{Identity, LocalAccess, RoomId, SessionIdentity, SyncConfig, TokenSource};

use crate::auth::IdentityProvider;
use crate::messaging::{ChatWriter, MessagingChannel};
use crate::navigation::{NavigationContext, with_room_param};
use crate::player::PlaybackElement;
use crate::playback::PlaybackSynchronizer;
use crate::presence::PresenceRegistry;
use crate::reactions::ReactionBroadcast;
use crate::room::{JoinOutcome, RoomError, RoomManager};
use crate::store::{StoreConnector, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session was already activated")]
    AlreadyActivated,

    #[error("No active room")]
    NotActive,

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    Uninitialized,
    Creating,
    Validating,
    Hosting,
    Viewing,
    Closed,
}

/// External collaborators a session is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StoreConnector>,
    pub auth: Arc<dyn IdentityProvider>,
    pub player: Arc<dyn PlaybackElement>,
    pub navigation: Arc<dyn NavigationContext>,
}

/// Components bound to the joined room.
pub struct ActiveRoom {
    pub room_id: RoomId,
    pub presence: PresenceRegistry,
    pub sync: PlaybackSynchronizer,
    pub messaging: MessagingChannel,
    pub reactions: ReactionBroadcast,
}

impl ActiveRoom {
    async fn shutdown(mut self) {
        self.sync.shutdown().await;
        self.reactions.shutdown().await;
        self.messaging.shutdown().await;
        self.presence.shutdown().await;
    }
}

/// One participant's watch-together session for one piece of media.
pub struct WatchSession {
    collaborators: Collaborators,
    rooms: RoomManager,
    media_id: String,
    config: SyncConfig,
    state: Participation,
    active: Option<ActiveRoom>,
    chat_visible: watch::Sender<bool>,
}

impl WatchSession {
    pub fn new(
        collaborators: Collaborators,
        identity: SessionIdentity,
        media_id: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        let rooms = RoomManager::new(
            collaborators.store.clone(),
            collaborators.auth.clone(),
            collaborators.player.clone(),
            identity,
            config.clone(),
        );
        let (chat_visible, _) = watch::channel(true);
        Self {
            collaborators,
            rooms,
            media_id: media_id.into(),
            config,
            state: Participation::Uninitialized,
            active: None,
            chat_visible,
        }
    }

    pub fn with_token_source(self, tokens: Box<dyn TokenSource>) -> Self {
        self.rooms.set_token_source(tokens);
        self
    }

    pub fn state(&self) -> Participation {
        self.state
    }

    pub fn identity(&self) -> &SessionIdentity {
        self.rooms.identity()
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn active(&self) -> Option<&ActiveRoom> {
        self.active.as_ref()
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.active.as_ref().map(|active| &active.room_id)
    }

    /// Local access, or `None` outside a room.
    pub fn access(&self) -> Option<LocalAccess> {
        self.active.as_ref().map(|active| active.presence.access())
    }

    /// Enter a room: create one when the location names none, otherwise
    /// validate the named one. Runs once per session.
    pub async fn activate(&mut self) -> Result<JoinOutcome, SessionError> {
        if self.state != Participation::Uninitialized {
            return Err(SessionError::AlreadyActivated);
        }

        let joined = match self.collaborators.navigation.room_param() {
            None => {
                self.state = Participation::Creating;
                self.rooms
                    .create_room(&self.media_id)
                    .await
                    .map(JoinOutcome::Created)
            }
            Some(room_id) => {
                self.state = Participation::Validating;
                self.rooms.validate_and_join(&room_id, &self.media_id).await
            }
        };
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "Could not enter a room");
                self.state = Participation::Closed;
                return Err(err.into());
            }
        };

        if let JoinOutcome::Created(room_id) = &outcome {
            self.collaborators.navigation.set_room_param(Some(room_id));
        }

        let active = self.attach(&outcome);
        if outcome.requires_resync() {
            if let Err(err) = active.sync.force_resync().await {
                tracing::warn!(room_id = %active.room_id, error = %err, "Initial resync failed");
            }
        }
        self.active = Some(active);
        self.state = if outcome.is_host() {
            Participation::Hosting
        } else {
            Participation::Viewing
        };

        tracing::info!(
            room_id = %outcome.room_id(),
            user_id = %self.identity().id,
            state = ?self.state,
            "Session active"
        );
        Ok(outcome)
    }

    fn attach(&self, outcome: &JoinOutcome) -> ActiveRoom {
        let store = self.collaborators.store.clone();
        let room_id = outcome.room_id().clone();
        let self_id = self.identity().id.clone();
        let initial = if outcome.is_host() {
            LocalAccess::HOST
        } else {
            LocalAccess::VIEWER
        };

        let presence =
            PresenceRegistry::attach(store.clone(), room_id.clone(), self_id.clone(), initial);
        let chat = ChatWriter::new(
            store.clone(),
            room_id.clone(),
            self_id.clone(),
            self.rooms.display_name(),
        );
        let mut sync = PlaybackSynchronizer::new(
            store.clone(),
            self.collaborators.player.clone(),
            chat.clone(),
            self_id.clone(),
            presence.watch_access(),
            self.config.clone(),
        );
        sync.start();
        let messaging = MessagingChannel::attach(chat);
        let reactions =
            ReactionBroadcast::attach(store, room_id.clone(), self_id, self.config.reaction_ttl);

        ActiveRoom {
            room_id,
            presence,
            sync,
            messaging,
            reactions,
        }
    }

    /// Leave the room: strip it from the location and stop every listener and
    /// timer. The user record stays in the store.
    pub async fn close(&mut self) {
        if self.state == Participation::Closed {
            return;
        }
        self.collaborators.navigation.set_room_param(None);
        if let Some(active) = self.active.take() {
            tracing::info!(room_id = %active.room_id, "Leaving room");
            active.shutdown().await;
        }
        self.state = Participation::Closed;
    }

    /// Snap to the room's playback state. A no-op for the host.
    pub async fn resync(&self) -> Result<bool, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        Ok(active.sync.force_resync().await?)
    }

    /// Link that brings someone else into this room.
    pub fn invite_link(&self) -> Option<Url> {
        let room_id = self.room_id()?;
        Some(with_room_param(
            &self.collaborators.navigation.current_url(),
            Some(room_id),
        ))
    }

    pub async fn send_message(&self, text: &str) -> Result<Option<String>, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        Ok(active.messaging.send_message(text).await?)
    }

    pub async fn send_reaction(&self, symbol: &str) -> Result<Option<String>, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        Ok(active.reactions.send(symbol).await?)
    }

    pub async fn grant_control(
        &self,
        target: &Identity,
        allowed: bool,
    ) -> Result<bool, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        Ok(active.presence.grant_control(target, allowed).await?)
    }

    pub fn chat_visible(&self) -> bool {
        *self.chat_visible.borrow()
    }

    pub fn set_chat_visible(&self, visible: bool) {
        self.chat_visible.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
    }

    /// Flip the chat panel and return the new visibility.
    pub fn toggle_chat(&self) -> bool {
        let visible = !self.chat_visible();
        self.set_chat_visible(visible);
        visible
    }

    /// Notified on every chat panel visibility change.
    pub fn watch_chat_visibility(&self) -> watch::Receiver<bool> {
        self.chat_visible.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticIdentityProvider;
    use crate::navigation::UrlNavigation;
    use crate::player::SimulatedPlayer;
    use crate::store::MemoryStore;
    use serde_json::{Value, json};
    use std::time::Duration;
    use watchparty_core::SequenceTokenSource;

    const PAGE: &str = "https://watch.example/v/movie-1";

    struct Client {
        session: WatchSession,
        player: Arc<SimulatedPlayer>,
        navigation: Arc<UrlNavigation>,
    }

    fn client(
        store: &MemoryStore,
        url: &str,
        auth: StaticIdentityProvider,
        identity: SessionIdentity,
    ) -> Client {
        let player = Arc::new(SimulatedPlayer::new());
        let navigation = Arc::new(UrlNavigation::parse(url).unwrap());
        let collaborators = Collaborators {
            store: Arc::new(store.clone()),
            auth: Arc::new(auth),
            player: player.clone(),
            navigation: navigation.clone(),
        };
        let session = WatchSession::new(collaborators, identity, "movie-1", SyncConfig::default())
            .with_token_source(Box::new(SequenceTokenSource::new(["room1"])));
        Client {
            session,
            player,
            navigation,
        }
    }

    fn alice(store: &MemoryStore) -> Client {
        client(
            store,
            PAGE,
            StaticIdentityProvider::signed_in("uid-a", Some("Alice")),
            SessionIdentity::new("alice", "User_111"),
        )
    }

    fn bob(store: &MemoryStore, url: &str) -> Client {
        client(
            store,
            url,
            StaticIdentityProvider::anonymous(),
            SessionIdentity::new("bob", "User_222"),
        )
    }

    fn state(store: &MemoryStore) -> Value {
        store.dump()["rooms"]["room1"]["state"].clone()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_and_viewer_scenario() {
        let store = MemoryStore::new();

        let mut a = alice(&store);
        let outcome = a.session.activate().await.unwrap();
        assert_eq!(outcome, JoinOutcome::Created(RoomId::new("room1")));
        assert_eq!(a.session.state(), Participation::Hosting);
        assert_eq!(a.navigation.room_param(), Some(RoomId::new("room1")));
        assert_eq!(state(&store)["isPlaying"], json!(false));
        assert_eq!(state(&store)["currentTime"], json!(0.0));

        let invite = a.session.invite_link().unwrap();
        let mut b = bob(&store, invite.as_str());
        let outcome = b.session.activate().await.unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(RoomId::new("room1")));
        assert_eq!(b.session.state(), Participation::Viewing);
        assert!(!b.player.is_playing());
        assert_eq!(b.player.current_time(), 0.0);

        // A plays; B follows within the guard window.
        a.player.play();
        settle().await;
        assert!(b.player.is_playing());
        assert_eq!(state(&store)["updatedBy"], json!("alice"));

        // A seeks far ahead of B.
        tokio::time::sleep(Duration::from_secs(3)).await;
        b.player.advance(2.0);
        a.player.seek(120.0);
        settle().await;
        assert_eq!(b.player.current_time(), 120.0);

        // B has no control: the toggle stays local.
        tokio::time::sleep(Duration::from_secs(3)).await;
        b.player.pause();
        settle().await;
        assert_eq!(state(&store)["updatedBy"], json!("alice"));
        assert_eq!(state(&store)["isPlaying"], json!(true));

        let notices: Vec<_> = a
            .session
            .active()
            .unwrap()
            .messaging
            .messages()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(notices, ["Alice played"]);

        b.session.close().await;
        a.session.close().await;
        assert_eq!(store.listener_count(), 0);
        assert_eq!(a.navigation.room_param(), None);
        // Membership survives leaving.
        assert!(store.dump()["rooms"]["room1"]["users"]["bob"].is_object());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cohost_writes_but_host_keeps_its_clock() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();
        let mut b = bob(&store, &format!("{PAGE}?room=room1"));
        b.session.activate().await.unwrap();
        settle().await;

        assert!(a.session.grant_control(&Identity::from("bob"), true).await.unwrap());
        settle().await;
        assert_eq!(
            b.session.access(),
            Some(LocalAccess {
                is_host: false,
                can_control: true
            })
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        b.player.seek(45.0);
        settle().await;
        assert_eq!(state(&store)["updatedBy"], json!("bob"));
        assert_eq!(state(&store)["currentTime"], json!(45.0));
        assert_eq!(a.player.current_time(), 0.0);

        // Non-hosts cannot hand out control.
        assert!(!b.session.grant_control(&Identity::from("alice"), false).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_host_reclaims_without_writes() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();
        a.session.close().await;
        let before = store.dump()["rooms"]["room1"]["users"].clone();

        let mut again = client(
            &store,
            &format!("{PAGE}?room=room1"),
            StaticIdentityProvider::anonymous(),
            SessionIdentity::new("alice", "User_111"),
        );
        let outcome = again.session.activate().await.unwrap();
        settle().await;

        assert_eq!(outcome, JoinOutcome::Reclaimed(RoomId::new("room1")));
        assert_eq!(again.session.state(), Participation::Hosting);
        assert_eq!(again.session.access(), Some(LocalAccess::HOST));
        assert_eq!(store.dump()["rooms"]["room1"]["users"], before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_create_closes_session() {
        let store = MemoryStore::new();
        let mut anon = bob(&store, PAGE);

        let err = anon.session.activate().await.unwrap_err();
        assert!(matches!(err, SessionError::Room(RoomError::AuthRequired)));
        assert_eq!(anon.session.state(), Participation::Closed);
        assert_eq!(store.dump(), Value::Null);
        assert!(matches!(
            anon.session.activate().await,
            Err(SessionError::AlreadyActivated)
        ));
        assert!(matches!(anon.session.resync().await, Err(SessionError::NotActive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_manual_resync() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();
        a.player.seek(1.0);
        settle().await;

        let mut b = bob(&store, &format!("{PAGE}?room=room1"));
        b.session.activate().await.unwrap();
        assert_eq!(b.player.current_time(), 1.0);

        b.player.seek(2.5);
        assert!(b.session.resync().await.unwrap());
        assert_eq!(b.player.current_time(), 1.0);
        assert!(!a.session.resync().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_and_reactions_through_session() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();

        assert_eq!(a.session.send_message("   ").await.unwrap(), None);
        a.session.send_message("hello").await.unwrap();
        a.session.send_reaction("😂").await.unwrap();
        settle().await;

        let active = a.session.active().unwrap();
        assert_eq!(active.messaging.messages().len(), 1);
        assert_eq!(active.reactions.active().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_visibility() {
        let store = MemoryStore::new();
        let a = alice(&store);
        let mut visibility = a.session.watch_chat_visibility();

        assert!(a.session.chat_visible());
        assert!(*visibility.borrow());
        assert!(!a.session.toggle_chat());
        assert!(visibility.has_changed().unwrap());
        assert!(!*visibility.borrow_and_update());

        a.session.set_chat_visible(false);
        assert!(!visibility.has_changed().unwrap());
        assert!(a.session.toggle_chat());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_listeners_but_keeps_room() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();
        let navigation = a.navigation.clone();
        assert!(store.listener_count() > 0);

        drop(a);
        settle().await;
        assert_eq!(navigation.room_param(), Some(RoomId::new("room1")));
        assert_eq!(store.listener_count(), 0);

        // Remounting on the same location reclaims the room.
        let mut again = client(
            &store,
            navigation.current_url().as_str(),
            StaticIdentityProvider::signed_in("uid-a", Some("Alice")),
            SessionIdentity::new("alice", "User_111"),
        );
        let outcome = again.session.activate().await.unwrap();
        assert_eq!(outcome, JoinOutcome::Reclaimed(RoomId::new("room1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cohost_can_pause_while_host_plays() {
        let store = MemoryStore::new();
        let mut a = alice(&store);
        a.session.activate().await.unwrap();
        let mut b = bob(&store, &format!("{PAGE}?room=room1"));
        b.session.activate().await.unwrap();
        assert!(a.session.grant_control(&Identity::from("bob"), true).await.unwrap());
        settle().await;

        a.player.play();
        settle().await;
        assert!(b.player.is_playing());

        // Steady playback on both sides for well past the guard window.
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            a.player.advance(0.25);
            b.player.advance(0.25);
        }
        settle().await;
        assert!(!b.session.active().unwrap().sync.guard_active());

        b.player.pause();
        settle().await;
        assert_eq!(state(&store)["isPlaying"], json!(false));
        assert_eq!(state(&store)["updatedBy"], json!("bob"));
    }
}
