//! Application-facing observer interface.
//!
//! Ported from `txgossip.gossip.Participant`: a small set of callbacks the
//! embedding application overrides to react to cluster state, plus a
//! narrow, explicit surface (`Effects`) for writing the local node's own
//! attributes back in reaction. Kept as a plain trait with default no-op
//! methods rather than a mixin hierarchy — recipes (leader election,
//! key-value store) are `Participant` implementations, not base classes a
//! user's type has to inherit from.

use std::collections::HashMap;

use serde_json::Value;

use crate::state::PeerState;

/// The surface handed to every `Participant` callback: self-state writes,
/// plus read-only access to the rest of the peer table.
///
/// Mutation is scoped to the local node's own attributes — the only way to
/// affect a remote peer's state is gossip, never a direct write. Writes made
/// here are queued and dispatched (including any observer notifications
/// they in turn raise) once the current callback returns, so a
/// `Participant` can freely call `set` from inside `value_changed`, or read
/// every live peer's vote to compute a consensus, without reentering its
/// own dispatch loop or touching a lock.
pub struct Effects<'a> {
    table: &'a mut HashMap<String, PeerState>,
    self_name: &'a str,
    pending: &'a mut Vec<(String, Value)>,
}

impl<'a> Effects<'a> {
    pub(crate) fn new(
        table: &'a mut HashMap<String, PeerState>,
        self_name: &'a str,
        pending: &'a mut Vec<(String, Value)>,
    ) -> Self {
        Effects { table, self_name, pending }
    }

    pub fn self_name(&self) -> &str {
        self.self_name
    }

    /// Queue a write to one of the local node's own attributes.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.pending.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.table.get(self.self_name)?.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.table
            .get(self.self_name)
            .map(|s| s.has(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<&String> {
        self.table
            .get(self.self_name)
            .map(|s| s.keys().collect())
            .unwrap_or_default()
    }

    /// Snapshot of any peer's state by name, self included.
    pub fn peer(&self, name: &str) -> Option<PeerState> {
        self.table.get(name).cloned()
    }

    /// Every peer currently considered alive, self excluded.
    pub fn live_peers(&self) -> Vec<PeerState> {
        self.table
            .values()
            .filter(|s| s.is_alive() && s.name() != self.self_name)
            .cloned()
            .collect()
    }

    /// Every peer currently considered dead, self excluded.
    pub fn dead_peers(&self) -> Vec<PeerState> {
        self.table
            .values()
            .filter(|s| !s.is_alive() && s.name() != self.self_name)
            .cloned()
            .collect()
    }
}

/// Observer over gossip state transitions.
///
/// All methods default to doing nothing; implementors override only the
/// callbacks they care about. `value_changed` is called for every attribute
/// write on every peer (including the local node's own writes and the
/// reserved heartbeat key) — filtering is the implementor's job.
pub trait Participant: Send {
    /// Called once, synchronously, right after the gossiper finishes
    /// startup and admits its own local peer entry.
    fn make_connection(&mut self, _effects: &mut Effects<'_>) {}

    /// An attribute changed on `peer` (which may be the local node).
    fn value_changed(&mut self, _effects: &mut Effects<'_>, _peer: &PeerState, _key: &str, _value: &Value) {}

    /// `peer` transitioned from suspected/unknown to alive.
    fn peer_alive(&mut self, _effects: &mut Effects<'_>, _peer: &PeerState) {}

    /// `peer` transitioned from alive to suspected dead.
    fn peer_dead(&mut self, _effects: &mut Effects<'_>, _peer: &PeerState) {}
}

/// A `Participant` that observes without reacting. Useful as a default for
/// a bare gossip-only node, or as a base to wrap with logging.
#[derive(Debug, Default)]
pub struct NullParticipant;

impl Participant for NullParticipant {}
