//! Tunables for the watch-together protocol.

use std::time::Duration;

use crate::room_id::DEFAULT_TOKEN_LEN;

const ENV_DRIFT_THRESHOLD: &str = "WATCHPARTY_DRIFT_THRESHOLD_SECS";
const ENV_GUARD_WINDOW_MS: &str = "WATCHPARTY_GUARD_WINDOW_MS";
const ENV_PROGRESS_DEBOUNCE_MS: &str = "WATCHPARTY_PROGRESS_DEBOUNCE_MS";
const ENV_REACTION_TTL_MS: &str = "WATCHPARTY_REACTION_TTL_MS";

/// Timing and sizing knobs shared by every component of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Drift (seconds) a viewer tolerates before seeking. Strictly greater triggers.
    pub drift_threshold_secs: f64,
    /// How long an applied remote update suppresses local re-emission.
    pub guard_window: Duration,
    /// Delay before continued playback progress is written.
    pub progress_debounce: Duration,
    /// Lifetime of an on-screen reaction.
    pub reaction_ttl: Duration,
    /// Length of generated room tokens.
    pub room_token_len: usize,
    /// Token draws before room creation gives up on collisions.
    pub max_token_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_secs: 3.0,
            guard_window: Duration::from_secs(2),
            progress_debounce: Duration::from_secs(2),
            reaction_ttl: Duration::from_secs(3),
            room_token_len: DEFAULT_TOKEN_LEN,
            max_token_attempts: 5,
        }
    }
}

impl SyncConfig {
    /// Defaults, overridden by any `WATCHPARTY_*` variable that parses.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(threshold) = lookup(ENV_DRIFT_THRESHOLD)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
        {
            config.drift_threshold_secs = threshold;
        }
        if let Some(guard) = millis(ENV_GUARD_WINDOW_MS) {
            config.guard_window = guard;
        }
        if let Some(debounce) = millis(ENV_PROGRESS_DEBOUNCE_MS) {
            config.progress_debounce = debounce;
        }
        if let Some(ttl) = millis(ENV_REACTION_TTL_MS) {
            config.reaction_ttl = ttl;
        }
        config
    }
}
