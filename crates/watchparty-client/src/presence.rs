//! Presence & permission registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use watchparty_core::presence::decode_users;
use watchparty_core::{Identity, LocalAccess, Permissions, RoomId, UserRecord, keyspace};

use crate::store::{StoreConnector, StoreError, Subscription, encode_fields};

type UserMap = BTreeMap<Identity, UserRecord>;

/// Mirrors `rooms/{id}/users` and derives what the local participant may do.
pub struct PresenceRegistry {
    store: Arc<dyn StoreConnector>,
    room_id: RoomId,
    self_id: Identity,
    users: watch::Receiver<UserMap>,
    access: watch::Receiver<LocalAccess>,
    task: Option<JoinHandle<()>>,
}

impl PresenceRegistry {
    /// Subscribe to the room's users. `initial` holds until the store's copy
    /// of our record says otherwise.
    pub fn attach(
        store: Arc<dyn StoreConnector>,
        room_id: RoomId,
        self_id: Identity,
        initial: LocalAccess,
    ) -> Self {
        let (users_tx, users) = watch::channel(UserMap::new());
        let (access_tx, access) = watch::channel(initial);
        let subscription = store.subscribe_value(&keyspace::users(&room_id));
        let task = tokio::spawn(track_users(
            subscription,
            room_id.clone(),
            self_id.clone(),
            users_tx,
            access_tx,
        ));

        Self {
            store,
            room_id,
            self_id,
            users,
            access,
            task: Some(task),
        }
    }

    pub fn access(&self) -> LocalAccess {
        *self.access.borrow()
    }

    /// Receiver that observes every change of [`PresenceRegistry::access`].
    pub fn watch_access(&self) -> watch::Receiver<LocalAccess> {
        self.access.clone()
    }

    pub fn users(&self) -> UserMap {
        self.users.borrow().clone()
    }

    pub fn watch_users(&self) -> watch::Receiver<UserMap> {
        self.users.clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.users.borrow().len()
    }

    /// Grant or revoke playback control for `target`.
    ///
    /// Only the host may do this, and never for itself; anything else is a
    /// local no-op. Returns whether a write was issued.
    pub async fn grant_control(&self, target: &Identity, allowed: bool) -> Result<bool, StoreError> {
        if !self.access().may_grant(&self.self_id, target) {
            tracing::debug!(room_id = %self.room_id, target = %target, "Ignoring control change: not permitted");
            return Ok(false);
        }
        if !self.users.borrow().contains_key(target) {
            tracing::debug!(room_id = %self.room_id, target = %target, "Ignoring control change: unknown user");
            return Ok(false);
        }

        let fields = encode_fields(&Permissions {
            can_control: allowed,
        })?;
        self.store
            .update(&keyspace::user_permissions(&self.room_id, target), fields)
            .await?;

        tracing::info!(room_id = %self.room_id, target = %target, allowed, "Control permission changed");
        Ok(true)
    }

    /// Stop following the store and wait for the listener to go away.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for PresenceRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn track_users(
    mut subscription: Subscription<Option<serde_json::Value>>,
    room_id: RoomId,
    self_id: Identity,
    users: watch::Sender<UserMap>,
    access: watch::Sender<LocalAccess>,
) {
    while let Some(snapshot) = subscription.recv().await {
        // A vanished users node leaves the last known roster in place.
        let Some(snapshot) = snapshot else { continue };
        let decoded = decode_users(Some(&snapshot));
        let previous = *access.borrow();
        let next = LocalAccess::project(&decoded, &self_id, previous);

        users.send_replace(decoded);
        if next != previous {
            tracing::info!(
                room_id = %room_id,
                user_id = %self_id,
                is_host = next.is_host,
                can_control = next.can_control,
                "Local access changed"
            );
            access.send_replace(next);
        }
    }
}
