//! Read-path policy for replicated playback state.
//!
//! Decides what a client does with an incoming [`PlaybackState`] snapshot.
//! The policy is pure; timers and the actual player live in the client crate.

use crate::identity::Identity;
use crate::model::PlaybackState;

/// Local playback clock as sampled from the player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPlayback {
    pub is_playing: bool,
    pub current_time: f64,
}

impl LocalPlayback {
    pub fn new(is_playing: bool, current_time: f64) -> Self {
        Self {
            is_playing,
            current_time,
        }
    }
}

/// Corrections to apply to the local player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ApplyPlan {
    pub set_playing: Option<bool>,
    pub seek_to: Option<f64>,
}

impl ApplyPlan {
    pub fn is_noop(&self) -> bool {
        self.set_playing.is_none() && self.seek_to.is_none()
    }
}

/// Outcome of evaluating a remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotVerdict {
    /// We wrote this state ourselves.
    OwnEcho,
    /// We are the host; our clock is canonical.
    HostAuthority,
    /// Non-host consumer: arm the guard window and apply the plan.
    Apply(ApplyPlan),
}

/// Drift threshold and snapshot evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftPolicy {
    threshold_secs: f64,
}

impl DriftPolicy {
    pub fn new(threshold_secs: f64) -> Self {
        Self { threshold_secs }
    }

    pub fn threshold_secs(&self) -> f64 {
        self.threshold_secs
    }

    /// Strictly greater than the threshold; equality is tolerated.
    pub fn exceeds(&self, remote_time: f64, local_time: f64) -> bool {
        remote_time.is_finite() && (remote_time - local_time).abs() > self.threshold_secs
    }

    /// Regular read path for a snapshot of `state`.
    pub fn evaluate(
        &self,
        remote: &PlaybackState,
        local: LocalPlayback,
        self_id: &Identity,
        is_host: bool,
    ) -> SnapshotVerdict {
        if &remote.updated_by == self_id {
            return SnapshotVerdict::OwnEcho;
        }
        if is_host {
            return SnapshotVerdict::HostAuthority;
        }

        let set_playing = (remote.is_playing != local.is_playing).then_some(remote.is_playing);
        let seek_to = remote
            .current_time
            .filter(|&time| self.exceeds(time, local.current_time));
        SnapshotVerdict::Apply(ApplyPlan {
            set_playing,
            seek_to,
        })
    }

    /// Unconditional apply used right after joining: ignores the threshold.
    pub fn resync_plan(remote: &PlaybackState, local: LocalPlayback) -> ApplyPlan {
        ApplyPlan {
            set_playing: (remote.is_playing != local.is_playing).then_some(remote.is_playing),
            seek_to: remote.current_time.filter(|time| time.is_finite()),
        }
    }
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self::new(3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(is_playing: bool, current_time: f64, by: &str) -> PlaybackState {
        PlaybackState::authored(is_playing, current_time, Identity::from(by))
    }

    #[test]
    fn test_own_echo_ignored() {
        let policy = DriftPolicy::default();
        let verdict = policy.evaluate(
            &remote(true, 500.0, "me"),
            LocalPlayback::new(false, 0.0),
            &Identity::from("me"),
            false,
        );
        assert_eq!(verdict, SnapshotVerdict::OwnEcho);
    }

    #[test]
    fn test_host_is_fixed_point() {
        let policy = DriftPolicy::default();
        let verdict = policy.evaluate(
            &remote(true, 500.0, "cohost"),
            LocalPlayback::new(false, 0.0),
            &Identity::from("host"),
            true,
        );
        assert_eq!(verdict, SnapshotVerdict::HostAuthority);
    }

    #[test]
    fn test_drift_threshold_is_strict() {
        let policy = DriftPolicy::default();
        let me = Identity::from("viewer");

        let at_threshold = policy.evaluate(
            &remote(false, 13.0, "host"),
            LocalPlayback::new(false, 10.0),
            &me,
            false,
        );
        assert_eq!(at_threshold, SnapshotVerdict::Apply(ApplyPlan::default()));

        let over = policy.evaluate(
            &remote(false, 13.01, "host"),
            LocalPlayback::new(false, 10.0),
            &me,
            false,
        );
        assert_eq!(
            over,
            SnapshotVerdict::Apply(ApplyPlan {
                set_playing: None,
                seek_to: Some(13.01),
            })
        );

        // Drift is symmetric.
        assert!(policy.exceeds(2.0, 120.0));
        assert!(!policy.exceeds(117.0, 120.0));
    }

    #[test]
    fn test_play_state_mismatch() {
        let policy = DriftPolicy::default();
        let verdict = policy.evaluate(
            &remote(true, 0.5, "host"),
            LocalPlayback::new(false, 0.0),
            &Identity::from("viewer"),
            false,
        );
        assert_eq!(
            verdict,
            SnapshotVerdict::Apply(ApplyPlan {
                set_playing: Some(true),
                seek_to: None,
            })
        );
    }

    #[test]
    fn test_resync_ignores_threshold() {
        let plan = DriftPolicy::resync_plan(&remote(false, 1.0, "host"), LocalPlayback::new(false, 0.0));
        assert_eq!(plan.set_playing, None);
        assert_eq!(plan.seek_to, Some(1.0));
    }

    #[test]
    fn test_missing_time_still_applies_play_state() {
        let policy = DriftPolicy::default();
        let mut state = remote(true, 0.0, "host");
        state.current_time = None;

        let verdict = policy.evaluate(
            &state,
            LocalPlayback::new(false, 80.0),
            &Identity::from("viewer"),
            false,
        );
        assert_eq!(
            verdict,
            SnapshotVerdict::Apply(ApplyPlan {
                set_playing: Some(true),
                seek_to: None,
            })
        );
        let plan = DriftPolicy::resync_plan(&state, LocalPlayback::new(false, 80.0));
        assert_eq!(plan.seek_to, None);
        assert_eq!(plan.set_playing, Some(true));
    }

    #[test]
    fn test_non_finite_remote_time_never_seeks() {
        let policy = DriftPolicy::default();
        assert!(!policy.exceeds(f64::NAN, 0.0));
        let plan = DriftPolicy::resync_plan(&remote(true, f64::INFINITY, "host"), LocalPlayback::new(true, 0.0));
        assert!(plan.is_noop());
    }
}
