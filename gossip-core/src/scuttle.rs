//! Digest/delta reconciliation — the "scuttle" in Scuttlebutt.
//!
//! Computing a digest, reconciling it against a peer's, and applying the
//! resulting deltas are kept as free functions over a peer table rather than
//! a stateful object: `Scuttle` itself carries no data of its own in the
//! reference implementation either, it only ever closes over the gossiper's
//! state table for the duration of one call.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{PeerEvent, PeerState, VersionedAttr};

/// Peer name -> highest attribute version known for that peer.
/// Sent in the first phase of an exchange.
pub type Digest = HashMap<String, u64>;

/// A single versioned attribute write, tagged with the peer it belongs to.
/// Sent in the second and third phases of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub peer: String,
    pub key: String,
    pub value: Value,
    pub version: u64,
}

/// Outcome of reconciling a remote digest against local state.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Peers named in the remote digest this node has never heard of.
    /// The caller is expected to admit them (at version 0) before the next
    /// digest exchange references them again.
    pub new_peers: Vec<String>,
    /// Peers for which the remote side is ahead: sent back as a digest so
    /// the remote can answer with the deltas this node is missing.
    pub requests: Digest,
    /// Peers for which the local side is ahead: deltas to ship to the
    /// remote, ordered richest-peer-first.
    pub deltas: Vec<Delta>,
}

/// Produce this node's digest: the highest attribute version known for each
/// locally tracked peer, including the local node's own entry.
pub fn digest(table: &HashMap<String, PeerState>) -> Digest {
    table
        .iter()
        .map(|(name, state)| (name.clone(), state.max_version_seen()))
        .collect()
}

/// Reconcile a remote digest against local state.
///
/// Only peers named in `remote_digest` are considered — a peer known
/// locally but absent from the remote digest is left untouched, exactly as
/// many rounds of the exchange handle it: its entry simply isn't mentioned
/// until a future digest references it. For peers unknown locally, the name
/// is recorded in `new_peers` (and implicitly requested — an unknown peer
/// has local version 0). For peers ahead locally, the remaining deltas are
/// collected, grouped per peer, and flattened with the richest peers (most
/// deltas) first — this is what lets a single exchange round prioritize
/// catching a badly-lagging peer up over trickling out a handful of updates
/// to several already-close peers.
pub fn scuttle(table: &HashMap<String, PeerState>, remote_digest: &Digest) -> Reconciliation {
    let mut result = Reconciliation::default();
    let mut deltas_with_peer: Vec<(String, Vec<VersionedAttr>)> = Vec::new();

    for (peer, &remote_version) in remote_digest {
        match table.get(peer) {
            None => {
                result.new_peers.push(peer.clone());
                result.requests.insert(peer.clone(), 0);
            }
            Some(state) => {
                let local_version = state.max_version_seen();
                if local_version > remote_version {
                    let attrs = state.deltas_after(remote_version);
                    if !attrs.is_empty() {
                        deltas_with_peer.push((peer.clone(), attrs));
                    }
                } else if local_version < remote_version {
                    result.requests.insert(peer.clone(), local_version);
                }
            }
        }
    }

    deltas_with_peer.sort_by_key(|(_, attrs)| Reverse(attrs.len()));
    for (peer, attrs) in deltas_with_peer {
        for attr in attrs {
            result.deltas.push(Delta {
                peer: peer.clone(),
                key: attr.key,
                value: attr.value,
                version: attr.version,
            });
        }
    }

    result
}

/// Apply a batch of deltas fetched from a peer, admitting any previously
/// unknown peer name at the default phi threshold. Returns the `PeerEvent`s
/// raised along the way so the caller can forward them to the `Participant`.
pub fn update_known_state(
    table: &mut HashMap<String, PeerState>,
    deltas: Vec<Delta>,
    now: f64,
    default_phi_threshold: f64,
) -> Vec<(String, PeerEvent)> {
    let mut events = Vec::new();
    for delta in deltas {
        let state = table
            .entry(delta.peer.clone())
            .or_insert_with(|| PeerState::new(delta.peer.clone(), default_phi_threshold));
        if let Some(event) = state.update_with_delta(delta.key, delta.value, delta.version, now) {
            events.push((delta.peer, event));
        }
    }
    events
}

/// Collect the deltas a peer asked for in its `requests` digest.
pub fn fetch_deltas(table: &HashMap<String, PeerState>, requests: &Digest) -> Vec<Delta> {
    let mut deltas = Vec::new();
    for (peer, &lowest_version) in requests {
        if let Some(state) = table.get(peer) {
            for attr in state.deltas_after(lowest_version) {
                deltas.push(Delta {
                    peer: peer.clone(),
                    key: attr.key,
                    value: attr.value,
                    version: attr.version,
                });
            }
        }
    }
    deltas
}
