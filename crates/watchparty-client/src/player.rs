//! Local playback element.
//!
//! The synchronizer never owns the video element; it drives it through
//! [`PlaybackElement`] and listens to its events.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use watchparty_core::LocalPlayback;

const EVENT_CAPACITY: usize = 64;

/// Events a media element reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Playing,
    Paused,
    Seeked(f64),
    TimeUpdate(f64),
}

/// Control surface of a local media element.
pub trait PlaybackElement: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn seek(&self, time: f64);
    fn current_time(&self) -> f64;
    fn is_playing(&self) -> bool;

    /// Events emitted from now on, including those caused by our own calls.
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;

    fn snapshot(&self) -> LocalPlayback {
        LocalPlayback::new(self.is_playing(), self.current_time())
    }
}

#[derive(Debug, Default)]
struct Clock {
    is_playing: bool,
    current_time: f64,
}

/// Headless media element with a manually advanced clock.
///
/// Emits events the way a browser video element does: `Playing`/`Paused` only
/// on actual transitions, `Seeked` on every seek and `TimeUpdate` while the
/// clock advances during playback.
pub struct SimulatedPlayer {
    clock: Mutex<Clock>,
    events: broadcast::Sender<PlayerEvent>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self::at(0.0)
    }

    /// Paused player positioned at `time`.
    pub fn at(time: f64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clock: Mutex::new(Clock {
                is_playing: false,
                current_time: time.max(0.0),
            }),
            events,
        }
    }

    /// Move the clock forward by `secs` if playing.
    pub fn advance(&self, secs: f64) {
        let time = {
            let mut clock = self.clock.lock();
            if !clock.is_playing || secs <= 0.0 {
                return;
            }
            clock.current_time += secs;
            clock.current_time
        };
        self.emit(PlayerEvent::TimeUpdate(time));
    }

    fn set_playing(&self, playing: bool) {
        let changed = {
            let mut clock = self.clock.lock();
            let changed = clock.is_playing != playing;
            clock.is_playing = playing;
            changed
        };
        if changed {
            self.emit(if playing {
                PlayerEvent::Playing
            } else {
                PlayerEvent::Paused
            });
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackElement for SimulatedPlayer {
    fn play(&self) {
        self.set_playing(true);
    }

    fn pause(&self) {
        self.set_playing(false);
    }

    fn seek(&self, time: f64) {
        if !time.is_finite() {
            return;
        }
        let time = time.max(0.0);
        self.clock.lock().current_time = time;
        self.emit(PlayerEvent::Seeked(time));
    }

    fn current_time(&self) -> f64 {
        self.clock.lock().current_time
    }

    fn is_playing(&self) -> bool {
        self.clock.lock().is_playing
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}
