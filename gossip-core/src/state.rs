//! Per-peer versioned attribute store.
//!
//! One [`PeerState`] exists per known peer, including the local node itself.
//! Ported from `txgossip.state.PeerState`; the mutation split between
//! `update_local` (self only) and `update_with_delta` (everyone else) is load
//! bearing — see the invariants on each method.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detector::FailureDetector;

/// Default suspicion threshold above which a peer is considered dead.
pub const DEFAULT_PHI_THRESHOLD: f64 = 8.0;

/// The reserved attribute key whose updates feed the failure detector.
/// Never surfaced to application-level `Participant`s as meaningful data.
pub const HEARTBEAT_KEY: &str = "__heartbeat__";

/// A single versioned attribute, as returned by [`PeerState::deltas_after`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedAttr {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

/// An observable effect of mutating a [`PeerState`], to be forwarded to the
/// `Participant`. Kept as plain data (rather than invoking the participant
/// from inside `PeerState` itself) so the dispatch loop can process it
/// without `PeerState` needing a back-reference to its owner.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ValueChanged { key: String, value: Value },
    BecameAlive,
    BecameDead,
}

/// Versioned attribute set, liveness flag, and failure detector for one peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    name: String,
    attrs: HashMap<String, (Value, u64)>,
    max_version_seen: u64,
    heartbeat_version: u64,
    alive: bool,
    detector: FailureDetector,
    phi_threshold: f64,
}

impl PeerState {
    pub fn new(name: impl Into<String>, phi_threshold: f64) -> Self {
        PeerState {
            name: name.into(),
            attrs: HashMap::new(),
            max_version_seen: 0,
            heartbeat_version: 0,
            alive: false,
            detector: FailureDetector::new(),
            phi_threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_version_seen(&self) -> u64 {
        self.max_version_seen
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key).map(|(value, _)| value)
    }

    pub fn version_of(&self, key: &str) -> Option<u64> {
        self.attrs.get(key).map(|(_, version)| *version)
    }

    pub fn has(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.attrs.keys()
    }

    /// Self-only mutator. Always succeeds, always bumps `max_version_seen`,
    /// and always emits an event — never touches the failure detector (the
    /// local node does not suspect itself).
    pub fn update_local(&mut self, key: impl Into<String>, value: Value) -> PeerEvent {
        let key = key.into();
        self.max_version_seen += 1;
        let version = self.max_version_seen;
        self.attrs.insert(key.clone(), (value.clone(), version));
        PeerEvent::ValueChanged { key, value }
    }

    /// Non-self mutator. A delta whose version does not exceed
    /// `max_version_seen` is a silent no-op (it has already been applied, or
    /// arrived out of order from a slower peer) — this is what makes
    /// re-delivery idempotent.
    pub fn update_with_delta(
        &mut self,
        key: impl Into<String>,
        value: Value,
        version: u64,
        now: f64,
    ) -> Option<PeerEvent> {
        if version <= self.max_version_seen {
            return None;
        }
        let key = key.into();
        self.max_version_seen = version;
        self.attrs.insert(key.clone(), (value.clone(), version));
        if key == HEARTBEAT_KEY {
            self.detector.add(now);
        }
        Some(PeerEvent::ValueChanged { key, value })
    }

    /// Self-only. Increments the heartbeat counter and writes it through
    /// `update_local`, which is what actually bumps `max_version_seen` and
    /// notifies the participant.
    pub fn beat_that_heart(&mut self) -> PeerEvent {
        self.heartbeat_version += 1;
        self.update_local(HEARTBEAT_KEY, Value::from(self.heartbeat_version))
    }

    /// All attributes with `version > lowest_version`, ascending by version.
    /// The ascending order is what keeps a receiver's `max_version_seen`
    /// monotonic and its observer notifications causally ordered as it
    /// applies them one by one.
    pub fn deltas_after(&self, lowest_version: u64) -> Vec<VersionedAttr> {
        let mut deltas: Vec<VersionedAttr> = self
            .attrs
            .iter()
            .filter(|(_, (_, version))| *version > lowest_version)
            .map(|(key, (value, version))| VersionedAttr {
                key: key.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect();
        deltas.sort_by_key(|d| d.version);
        deltas
    }

    /// Recompute suspicion from the detector and transition `alive`
    /// accordingly. A `phi` of exactly `0.0` is treated as suspect — it means
    /// no heartbeat has ever arrived, which is what keeps a freshly admitted
    /// peer dead until its first heartbeat shows up in a later exchange.
    pub fn check_suspected(&mut self, now: f64) -> Option<PeerEvent> {
        let phi = self.detector.phi(now);
        if phi > self.phi_threshold || phi == 0.0 {
            self.mark_dead()
        } else {
            self.mark_alive()
        }
    }

    /// Edge-triggered dead -> alive transition.
    pub fn mark_alive(&mut self) -> Option<PeerEvent> {
        if !self.alive {
            self.alive = true;
            tracing::info!(peer = %self.name, "peer now alive");
            Some(PeerEvent::BecameAlive)
        } else {
            None
        }
    }

    /// Edge-triggered alive -> dead transition.
    pub fn mark_dead(&mut self) -> Option<PeerEvent> {
        if self.alive {
            self.alive = false;
            tracing::warn!(peer = %self.name, "peer now suspected dead");
            Some(PeerEvent::BecameDead)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: i64) -> Value {
        Value::from(n)
    }

    #[test]
    fn update_local_always_bumps_version_and_emits_event() {
        let mut state = PeerState::new("self:9000", DEFAULT_PHI_THRESHOLD);
        let event = state.update_local("k", v(1));
        assert!(matches!(event, PeerEvent::ValueChanged { .. }));
        assert_eq!(state.max_version_seen(), 1);
        assert_eq!(state.get("k"), Some(&v(1)));
    }

    #[test]
    fn update_with_delta_is_idempotent_for_stale_versions() {
        let mut state = PeerState::new("a:9000", DEFAULT_PHI_THRESHOLD);
        assert!(state.update_with_delta("k", v(1), 5, 0.0).is_some());
        assert_eq!(state.max_version_seen(), 5);

        // Re-delivery of the exact same delta is a no-op.
        assert!(state.update_with_delta("k", v(1), 5, 0.0).is_none());
        assert_eq!(state.max_version_seen(), 5);

        // An older version is also a no-op.
        assert!(state.update_with_delta("k", v(99), 3, 0.0).is_none());
        assert_eq!(state.get("k"), Some(&v(1)));
    }

    #[test]
    fn heartbeat_key_feeds_the_detector_only_via_delta_path() {
        let mut state = PeerState::new("a:9000", DEFAULT_PHI_THRESHOLD);
        assert!(!state.is_alive());
        state.update_with_delta(HEARTBEAT_KEY, v(1), 1, 0.0);
        // One sample isn't enough to clear suspicion (phi == 0 only before
        // any arrival; after one arrival phi is computed from a seeded mean).
        state.check_suspected(0.1);
        assert!(state.is_alive());
    }

    #[test]
    fn deltas_after_returns_strictly_newer_versions_ascending() {
        let mut state = PeerState::new("a:9000", DEFAULT_PHI_THRESHOLD);
        state.update_with_delta("a", v(1), 3, 0.0);
        state.update_with_delta("b", v(2), 1, 0.0);
        state.update_with_delta("c", v(3), 2, 0.0);

        let deltas = state.deltas_after(1);
        let versions: Vec<u64> = deltas.iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[test]
    fn alive_dead_transitions_are_edge_triggered() {
        let mut state = PeerState::new("a:9000", DEFAULT_PHI_THRESHOLD);
        // Never beat: phi() == 0, check_suspected should mark dead (already
        // dead, so no event).
        assert!(state.check_suspected(0.0).is_none());

        state.update_with_delta(HEARTBEAT_KEY, v(1), 1, 0.0);
        assert!(state.check_suspected(0.1).is_some()); // dead -> alive
        assert!(state.check_suspected(0.2).is_none()); // still alive, silent
    }
}
