//! Playback state synchronizer.
//!
//! Write path: local player events become `state` writes when the local
//! participant has control and no remote update is being applied. Read path:
//! every `state` snapshot is evaluated by [`DriftPolicy`] and applied to the
//! local player. The guard window keeps the events caused by applying a
//! remote snapshot from being written back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use watchparty_core::{
    ApplyPlan, DriftPolicy, Identity, LocalAccess, PlaybackState, RoomId, SnapshotVerdict,
    SyncConfig, keyspace,
};

use crate::messaging::ChatWriter;
use crate::player::{PlaybackElement, PlayerEvent};
use crate::store::{StoreConnector, StoreError, Subscription, decode, encode};

#[derive(Default)]
struct Timers {
    guard_until: Option<Instant>,
    debounce: Option<JoinHandle<()>>,
    /// Bumped on every cancel so a timer that already fired cannot claim a
    /// newer pending time.
    generation: u64,
    pending_time: Option<f64>,
}

impl Timers {
    fn cancel_debounce(&mut self) {
        if let Some(task) = self.debounce.take() {
            task.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.pending_time = None;
    }
}

struct Shared {
    store: Arc<dyn StoreConnector>,
    player: Arc<dyn PlaybackElement>,
    chat: ChatWriter,
    room_id: RoomId,
    self_id: Identity,
    access: watch::Receiver<LocalAccess>,
    policy: DriftPolicy,
    config: SyncConfig,
    timers: Mutex<Timers>,
    closed: AtomicBool,
}

/// Replicates play/pause/seek between the local player and the room's `state`.
pub struct PlaybackSynchronizer {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl PlaybackSynchronizer {
    pub fn new(
        store: Arc<dyn StoreConnector>,
        player: Arc<dyn PlaybackElement>,
        chat: ChatWriter,
        self_id: Identity,
        access: watch::Receiver<LocalAccess>,
        config: SyncConfig,
    ) -> Self {
        let room_id = chat.room_id().clone();
        Self {
            shared: Arc::new(Shared {
                store,
                player,
                chat,
                room_id,
                self_id,
                access,
                policy: DriftPolicy::new(config.drift_threshold_secs),
                config,
                timers: Mutex::new(Timers::default()),
                closed: AtomicBool::new(false),
            }),
            tasks: Vec::new(),
        }
    }

    /// Start the `state` listener and the player event pump.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        let states = self
            .shared
            .store
            .subscribe_value(&keyspace::state(&self.shared.room_id));
        let events = self.shared.player.subscribe();
        self.tasks
            .push(tokio::spawn(follow_state(self.shared.clone(), states)));
        self.tasks
            .push(tokio::spawn(pump_player(self.shared.clone(), events)));
        tracing::debug!(room_id = %self.shared.room_id, "Playback sync started");
    }

    /// Feed one local player event through the write path.
    pub async fn handle_local_event(&self, event: PlayerEvent) {
        self.shared.handle_local_event(event).await;
    }

    /// Run one remote snapshot through the read path.
    pub fn apply_remote(&self, state: &PlaybackState) -> SnapshotVerdict {
        self.shared.apply_remote(state)
    }

    /// Snap to the stored state, ignoring the drift threshold.
    ///
    /// Returns whether anything was applied: the host and rooms without a
    /// readable state are left alone.
    pub async fn force_resync(&self) -> Result<bool, StoreError> {
        self.shared.force_resync().await
    }

    pub fn guard_active(&self) -> bool {
        self.shared.guard_active()
    }

    pub fn debounce_pending(&self) -> bool {
        self.shared.timers.lock().debounce.is_some()
    }

    /// Stop both tasks and clear the guard and debounce timers.
    pub async fn shutdown(&mut self) {
        self.shared.close();
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for PlaybackSynchronizer {
    fn drop(&mut self) {
        self.shared.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut timers = self.timers.lock();
        timers.cancel_debounce();
        timers.guard_until = None;
    }

    fn guard_active(&self) -> bool {
        self.timers
            .lock()
            .guard_until
            .is_some_and(|until| Instant::now() < until)
    }

    fn arm_guard(&self) {
        let mut timers = self.timers.lock();
        timers.guard_until = Some(Instant::now() + self.config.guard_window);
        timers.cancel_debounce();
    }

    /// Write-path gate. Logs why a write was suppressed.
    fn may_write(&self, what: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.access.borrow().can_control {
            tracing::debug!(room_id = %self.room_id, what, "Local change not written: no control");
            return false;
        }
        if self.guard_active() {
            tracing::debug!(room_id = %self.room_id, what, "Local change not written: applying remote update");
            return false;
        }
        true
    }

    async fn handle_local_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::Playing | PlayerEvent::Paused => {
                if !self.may_write("play state") {
                    return;
                }
                let is_playing = event == PlayerEvent::Playing;
                self.timers.lock().cancel_debounce();
                if !self
                    .write_state(is_playing, self.player.current_time())
                    .await
                {
                    return;
                }
                let verb = if is_playing { "played" } else { "paused" };
                let notice = format!("{} {verb}", self.chat.display_name());
                if let Err(err) = self.chat.post_system_notice(&notice).await {
                    tracing::warn!(room_id = %self.room_id, error = %err, "Failed to post playback notice");
                }
            }
            PlayerEvent::Seeked(time) => {
                if !self.may_write("seek") {
                    return;
                }
                self.timers.lock().cancel_debounce();
                self.write_state(self.player.is_playing(), time).await;
            }
            PlayerEvent::TimeUpdate(time) => {
                if !self.may_write("progress") {
                    return;
                }
                self.schedule_progress(time);
            }
        }
    }

    /// Remember the latest progress and restart the debounce timer. The write
    /// happens only once progress has been quiet for the whole window.
    fn schedule_progress(self: &Arc<Self>, time: f64) {
        let mut timers = self.timers.lock();
        timers.cancel_debounce();
        timers.pending_time = Some(time);

        let generation = timers.generation;
        let shared = self.clone();
        timers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.config.progress_debounce).await;
            let pending = {
                let mut timers = shared.timers.lock();
                if timers.generation != generation {
                    return;
                }
                timers.debounce = None;
                timers.pending_time.take()
            };
            if let Some(time) = pending {
                if shared.may_write("progress") {
                    shared.write_state(shared.player.is_playing(), time).await;
                }
            }
        }));
    }

    async fn write_state(&self, is_playing: bool, current_time: f64) -> bool {
        let state = PlaybackState::authored(is_playing, current_time, self.self_id.clone());
        let result = match encode(&state) {
            Ok(value) => self.store.set(&keyspace::state(&self.room_id), value).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                tracing::debug!(room_id = %self.room_id, is_playing, current_time, "Playback state written");
                true
            }
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "Failed to write playback state");
                false
            }
        }
    }

    fn on_snapshot(&self, snapshot: Option<Value>) {
        match decode::<PlaybackState>(snapshot) {
            Ok(Some(state)) => {
                self.apply_remote(&state);
            }
            Ok(None) => {
                tracing::debug!(room_id = %self.room_id, "Room has no playback state");
            }
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "Skipping malformed playback state");
            }
        }
    }

    fn apply_remote(&self, state: &PlaybackState) -> SnapshotVerdict {
        let is_host = self.access.borrow().is_host;
        let verdict = self
            .policy
            .evaluate(state, self.player.snapshot(), &self.self_id, is_host);

        match verdict {
            SnapshotVerdict::OwnEcho => {
                tracing::trace!(room_id = %self.room_id, "Ignoring own playback echo");
            }
            SnapshotVerdict::HostAuthority => {
                tracing::debug!(room_id = %self.room_id, updated_by = %state.updated_by, "Host ignores remote playback state");
            }
            SnapshotVerdict::Apply(plan) => {
                self.arm_guard();
                self.execute(plan);
            }
        }
        verdict
    }

    async fn force_resync(&self) -> Result<bool, StoreError> {
        let is_host = self.access.borrow().is_host;
        if is_host {
            return Ok(false);
        }
        let snapshot = self.store.read(&keyspace::state(&self.room_id)).await?;
        let Some(state) = decode::<PlaybackState>(snapshot)? else {
            return Ok(false);
        };

        self.arm_guard();
        let plan = DriftPolicy::resync_plan(&state, self.player.snapshot());
        self.execute(plan);
        tracing::info!(
            room_id = %self.room_id,
            is_playing = state.is_playing,
            current_time = ?state.current_time,
            "Resynced to room state"
        );
        Ok(true)
    }

    fn execute(&self, plan: ApplyPlan) {
        if plan.is_noop() {
            return;
        }
        if let Some(time) = plan.seek_to {
            self.player.seek(time);
        }
        match plan.set_playing {
            Some(true) => self.player.play(),
            Some(false) => self.player.pause(),
            None => {}
        }
        tracing::debug!(room_id = %self.room_id, ?plan, "Applied remote playback state");
    }
}

async fn follow_state(shared: Arc<Shared>, mut states: Subscription<Option<Value>>) {
    while let Some(snapshot) = states.recv().await {
        shared.on_snapshot(snapshot);
    }
}

async fn pump_player(shared: Arc<Shared>, mut events: broadcast::Receiver<PlayerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => shared.handle_local_event(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(room_id = %shared.room_id, skipped, "Player events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
