//! The Gossiper: ties peer state, the failure detector, and the scuttle
//! exchange together, and owns the observer dispatch loop.
//!
//! Ported from `txgossip.gossip.Gossiper`. The original is a
//! `DatagramProtocol` that owns its socket directly; here the protocol state
//! machine is kept free of any socket so `gossip-transport` can drive it over
//! UDP, and tests can drive it over an in-memory channel, identically.
//!
//! Everything that mutates state goes through [`GossiperCore::dispatch`], a
//! trampoline rather than direct recursion: a `Participant` callback may
//! queue further local writes via [`Effects`], but those are only applied,
//! and re-dispatched, once the callback that queued them has returned. This
//! is what lets a recipe like leader election call back into its own
//! gossiper state from inside `value_changed` without ever reentering a
//! borrowed `Participant`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Scheduler, TimerHandle};
use crate::error::GossipError;
use crate::participant::{Effects, Participant};
use crate::scuttle::{self, Delta, Digest};
use crate::state::{PeerEvent, PeerState, DEFAULT_PHI_THRESHOLD};

/// The three messages exchanged over one gossip round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Phase 1: initiator -> target, carrying the initiator's digest.
    Request { digest: Digest },
    /// Phase 2: target -> initiator. `requests` tells the initiator what the
    /// target still needs; `deltas` is everything the target is ahead on.
    FirstResponse { requests: Digest, deltas: Vec<Delta> },
    /// Phase 3: initiator -> target, answering `requests` from phase 2.
    SecondResponse { deltas: Vec<Delta> },
}

/// Refuse to start against a wildcard bind address with no resolvable
/// identity — mirrors `txgossip`'s refusal to guess an outbound address.
fn validate_name(name: &str) -> Result<(), GossipError> {
    if name.starts_with("0.0.0.0") {
        Err(GossipError::MissingEndpoint)
    } else {
        Ok(())
    }
}

/// Pure protocol state: the peer table and this node's own identity.
/// Holds no participant, no lock, no clock — those are layered on by
/// [`GossiperCore`] and [`GossiperHandle`].
struct Gossiper {
    name: String,
    table: HashMap<String, PeerState>,
    phi_threshold: f64,
}

impl Gossiper {
    fn new(name: String, phi_threshold: f64) -> Self {
        Gossiper {
            name,
            table: HashMap::new(),
            phi_threshold,
        }
    }

    fn admit_self(&mut self) {
        let state = PeerState::new(self.name.clone(), self.phi_threshold);
        self.table.insert(self.name.clone(), state);
    }

    /// Admit peers by name with empty, not-yet-alive state, without waiting
    /// for a digest exchange to discover them. A peer already known is left
    /// untouched.
    fn seed(&mut self, names: &[String]) {
        for name in names {
            self.table
                .entry(name.clone())
                .or_insert_with(|| PeerState::new(name.clone(), self.phi_threshold));
        }
    }

    /// Random live peer to pull from, plus (probabilistically) a random
    /// dead peer to re-check — `len(dead) / (len(live) + 1)` odds, matching
    /// the reference implementation's bias toward eventually re-admitting
    /// recovered peers without spending a full round on every one.
    fn gossip_targets(&self) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let live: Vec<&String> = self
            .table
            .iter()
            .filter(|(name, state)| state.is_alive() && *name != &self.name)
            .map(|(name, _)| name)
            .collect();
        let dead: Vec<&String> = self
            .table
            .iter()
            .filter(|(name, state)| !state.is_alive() && *name != &self.name)
            .map(|(name, _)| name)
            .collect();

        let mut targets = Vec::new();
        if let Some(peer) = live.choose(&mut rng) {
            targets.push((*peer).clone());
        }
        if !dead.is_empty() {
            let odds = dead.len() as f64 / (live.len() as f64 + 1.0);
            if rand::Rng::gen_bool(&mut rng, odds.min(1.0)) {
                if let Some(peer) = dead.choose(&mut rng) {
                    targets.push((*peer).clone());
                }
            }
        }
        targets
    }
}

/// Bundles the protocol state with the application's `Participant` and runs
/// the observer dispatch loop.
struct GossiperCore {
    gossiper: Gossiper,
    participant: Box<dyn Participant>,
}

impl GossiperCore {
    /// Drain an event queue, delivering each to the `Participant` and
    /// re-queuing whatever local writes that callback made via `Effects`.
    fn dispatch(&mut self, mut queue: VecDeque<(String, PeerEvent)>) {
        while let Some((peer, event)) = queue.pop_front() {
            let Some(peer_snapshot) = self.gossiper.table.get(&peer).cloned() else {
                continue;
            };
            let mut pending_local_writes: Vec<(String, Value)> = Vec::new();
            let self_name = self.gossiper.name.clone();
            {
                let mut effects =
                    Effects::new(&mut self.gossiper.table, &self_name, &mut pending_local_writes);
                match &event {
                    PeerEvent::ValueChanged { key, value } => {
                        self.participant
                            .value_changed(&mut effects, &peer_snapshot, key, value);
                    }
                    PeerEvent::BecameAlive => {
                        self.participant.peer_alive(&mut effects, &peer_snapshot);
                    }
                    PeerEvent::BecameDead => {
                        self.participant.peer_dead(&mut effects, &peer_snapshot);
                    }
                }
            }
            for (key, value) in pending_local_writes {
                if let Some(local) = self.gossiper.table.get_mut(&self_name) {
                    let event = local.update_local(key, value);
                    queue.push_back((self_name.clone(), event));
                }
            }
        }
    }

    fn dispatch_make_connection(&mut self) {
        let self_name = self.gossiper.name.clone();
        let mut pending: Vec<(String, Value)> = Vec::new();
        {
            let mut effects = Effects::new(&mut self.gossiper.table, &self_name, &mut pending);
            self.participant.make_connection(&mut effects);
        }
        for (key, value) in pending {
            if let Some(local) = self.gossiper.table.get_mut(&self_name) {
                let event = local.update_local(key, value);
                self.dispatch(VecDeque::from([(self_name.clone(), event)]));
            }
        }
    }

    fn set_local(&mut self, key: String, value: Value) {
        let self_name = self.gossiper.name.clone();
        if let Some(local) = self.gossiper.table.get_mut(&self_name) {
            let event = local.update_local(key, value);
            self.dispatch(VecDeque::from([(self_name, event)]));
        }
    }

    fn beat_heart(&mut self) {
        let self_name = self.gossiper.name.clone();
        if let Some(local) = self.gossiper.table.get_mut(&self_name) {
            let event = local.beat_that_heart();
            self.dispatch(VecDeque::from([(self_name, event)]));
        }
    }

    fn seed(&mut self, names: &[String]) {
        self.gossiper.seed(names);
    }

    fn check_all_suspected(&mut self, now: f64) {
        let self_name = self.gossiper.name.clone();
        let mut queue = VecDeque::new();
        for (name, state) in self.gossiper.table.iter_mut() {
            if *name == self_name {
                continue;
            }
            if let Some(event) = state.check_suspected(now) {
                queue.push_back((name.clone(), event));
            }
        }
        self.dispatch(queue);
    }

    fn handle_request(&mut self, remote_digest: Digest) -> GossipMessage {
        let reconciliation = scuttle::scuttle(&self.gossiper.table, &remote_digest);
        for peer in &reconciliation.new_peers {
            self.gossiper
                .table
                .entry(peer.clone())
                .or_insert_with(|| PeerState::new(peer.clone(), self.gossiper.phi_threshold));
        }
        GossipMessage::FirstResponse {
            requests: reconciliation.requests,
            deltas: reconciliation.deltas,
        }
    }

    fn handle_first_response(&mut self, requests: Digest, deltas: Vec<Delta>, now: f64) -> GossipMessage {
        let events = scuttle::update_known_state(&mut self.gossiper.table, deltas, now, self.gossiper.phi_threshold);
        self.dispatch(VecDeque::from_iter(events));
        let reply_deltas = scuttle::fetch_deltas(&self.gossiper.table, &requests);
        GossipMessage::SecondResponse { deltas: reply_deltas }
    }

    fn handle_second_response(&mut self, deltas: Vec<Delta>, now: f64) {
        let events = scuttle::update_known_state(&mut self.gossiper.table, deltas, now, self.gossiper.phi_threshold);
        self.dispatch(VecDeque::from_iter(events));
    }
}

/// Cheaply cloneable handle to a running gossiper.
///
/// This is the type `gossip-transport`, `gossip-node`, and `gossip-recipes`
/// actually hold: every method locks internally for the duration of one
/// protocol operation and releases before returning, so a `Participant`
/// callback invoked synchronously during that operation (via `Effects`)
/// never needs to re-enter the lock, and a recipe's timer closure (fired
/// independently, later, by the `Scheduler`) can safely call back in.
#[derive(Clone)]
pub struct GossiperHandle {
    core: Arc<Mutex<GossiperCore>>,
    scheduler: Arc<dyn Scheduler>,
}

impl GossiperHandle {
    pub fn name(&self) -> String {
        self.core.lock().unwrap().gossiper.name.clone()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.core.lock().unwrap().set_local(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let core = self.core.lock().unwrap();
        core.gossiper
            .table
            .get(&core.gossiper.name)
            .and_then(|s| s.get(key))
            .cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        let core = self.core.lock().unwrap();
        core.gossiper
            .table
            .get(&core.gossiper.name)
            .map(|s| s.has(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        let core = self.core.lock().unwrap();
        core.gossiper
            .table
            .get(&core.gossiper.name)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of one peer's state, self included.
    pub fn peer(&self, name: &str) -> Option<PeerState> {
        self.core.lock().unwrap().gossiper.table.get(name).cloned()
    }

    pub fn peer_value(&self, peer: &str, key: &str) -> Option<Value> {
        self.peer(peer).and_then(|p| p.get(key).cloned())
    }

    pub fn live_peers(&self) -> Vec<PeerState> {
        let core = self.core.lock().unwrap();
        core.gossiper
            .table
            .values()
            .filter(|s| s.is_alive() && s.name() != core.gossiper.name)
            .cloned()
            .collect()
    }

    pub fn dead_peers(&self) -> Vec<PeerState> {
        let core = self.core.lock().unwrap();
        core.gossiper
            .table
            .values()
            .filter(|s| !s.is_alive() && s.name() != core.gossiper.name)
            .cloned()
            .collect()
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    /// This node's current digest: the highest attribute version known for
    /// each locally tracked peer, including the local node's own entry.
    pub fn digest(&self) -> Digest {
        let core = self.core.lock().unwrap();
        scuttle::digest(&core.gossiper.table)
    }

    /// Admit peers by name with empty, not-yet-alive state, without waiting
    /// for a digest exchange to discover them — the caller typically still
    /// needs to contact each seed directly for the first round to have
    /// anywhere to send a request to.
    pub fn seed(&self, names: &[String]) {
        self.core.lock().unwrap().seed(names);
    }

    /// One 1 Hz heartbeat tick: bump the local heartbeat attribute.
    pub fn heartbeat_tick(&self) {
        self.core.lock().unwrap().beat_heart();
    }

    /// One 1 Hz gossip tick: pick this round's targets from the peer table
    /// as it stands, then check suspicion on every peer — a peer that dies
    /// on this very tick is still a valid target for the round already in
    /// flight, matching the reference implementation's ordering.
    pub fn gossip_tick(&self) -> Vec<(String, GossipMessage)> {
        let now = self.scheduler.now();
        let mut core = self.core.lock().unwrap();
        let targets = core.gossiper.gossip_targets();
        let digest = scuttle::digest(&core.gossiper.table);
        core.check_all_suspected(now);
        targets
            .into_iter()
            .map(|peer| (peer, GossipMessage::Request { digest: digest.clone() }))
            .collect()
    }

    /// Process one inbound message from `from`, returning the reply (if
    /// any) the caller should send back.
    pub fn handle_message(&self, message: GossipMessage) -> Option<GossipMessage> {
        let now = self.scheduler.now();
        let mut core = self.core.lock().unwrap();
        match message {
            GossipMessage::Request { digest } => Some(core.handle_request(digest)),
            GossipMessage::FirstResponse { requests, deltas } => {
                Some(core.handle_first_response(requests, deltas, now))
            }
            GossipMessage::SecondResponse { deltas } => {
                core.handle_second_response(deltas, now);
                None
            }
        }
    }
}

/// Admit the local node, call `Participant::make_connection`, and return a
/// handle ready to be driven by a transport's request loop and a scheduler's
/// heartbeat/gossip timers.
///
/// Callers typically follow this with two `scheduler.call_every(1s, true,
/// ...)` registrations — one driving `heartbeat_tick`, one driving
/// `gossip_tick` — which is why both timers are left to the caller rather
/// than started here: `gossip-node` wires the transport in between.
pub fn start(
    name: impl Into<String>,
    phi_threshold: f64,
    participant: Box<dyn Participant>,
    scheduler: Arc<dyn Scheduler>,
) -> Result<GossiperHandle, GossipError> {
    let name = name.into();
    validate_name(&name)?;

    let phi_threshold = if phi_threshold > 0.0 { phi_threshold } else { DEFAULT_PHI_THRESHOLD };
    let mut gossiper = Gossiper::new(name, phi_threshold);
    gossiper.admit_self();

    let core = Arc::new(Mutex::new(GossiperCore { gossiper, participant }));
    core.lock().unwrap().dispatch_make_connection();

    Ok(GossiperHandle { core, scheduler })
}

/// Schedule the standard 1 Hz heartbeat and gossip timers against a running
/// handle. Returns both `TimerHandle`s so the caller can cancel them on
/// shutdown.
pub fn start_timers(handle: &GossiperHandle, transport_send: Arc<dyn Fn(String, GossipMessage) + Send + Sync>) -> (TimerHandle, TimerHandle) {
    let scheduler = handle.scheduler();
    let heartbeat_handle = handle.clone();
    let heartbeat_timer = scheduler.call_every(
        std::time::Duration::from_secs(1),
        true,
        Arc::new(move || heartbeat_handle.heartbeat_tick()),
    );

    let gossip_handle = handle.clone();
    let gossip_timer = scheduler.call_every(
        std::time::Duration::from_secs(1),
        true,
        Arc::new(move || {
            for (peer, message) in gossip_handle.gossip_tick() {
                transport_send(peer, message);
            }
        }),
    );

    (heartbeat_timer, gossip_timer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::participant::NullParticipant;

    fn handle(name: &str, scheduler: Arc<ManualClock>) -> GossiperHandle {
        start(name, DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), scheduler).unwrap()
    }

    #[test]
    fn rejects_wildcard_bind_address() {
        let scheduler = ManualClock::new();
        let err = start("0.0.0.0:9000", DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), scheduler);
        assert!(matches!(err, Err(GossipError::MissingEndpoint)));
    }

    #[test]
    fn self_peer_is_admitted_but_not_marked_alive() {
        // Liveness is derived through `check_suspected`, which is never run
        // against the local node's own entry (mirroring the reference
        // implementation) — self is excluded from `live_peers`/`dead_peers`
        // regardless of this flag, so it simply never gets touched.
        let scheduler = ManualClock::new();
        let h = handle("a:9000", scheduler);
        let snapshot = h.peer("a:9000").unwrap();
        assert!(!snapshot.is_alive());
    }

    #[test]
    fn three_phase_exchange_converges_two_nodes() {
        let scheduler = ManualClock::new();
        let a = handle("a:9000", scheduler.clone());
        let b = handle("b:9000", scheduler.clone());

        a.set("role", Value::from("primary"));
        b.set("role", Value::from("replica"));

        // a initiates against b.
        let request = GossipMessage::Request { digest: scuttle::digest(&a.core.lock().unwrap().gossiper.table) };
        let first_response = b.handle_message(request).unwrap();
        let second_response = a.handle_message(first_response).unwrap();
        b.handle_message(second_response);

        assert_eq!(a.peer_value("b:9000", "role"), Some(Value::from("replica")));
        assert_eq!(b.peer_value("a:9000", "role"), Some(Value::from("primary")));
    }

    #[test]
    fn heartbeat_and_gossip_tick_exchange_deltas_and_detect_liveness() {
        let scheduler = ManualClock::new();
        let a = handle("a:9000", scheduler.clone());
        let b = handle("b:9000", scheduler.clone());

        // Seed b into a's table via a fake digest exchange so gossip_tick
        // has a live peer to pick from once b starts heartbeating.
        let request = GossipMessage::Request { digest: scuttle::digest(&b.core.lock().unwrap().gossiper.table) };
        let first = a.handle_message(request).unwrap();
        b.handle_message(first);

        for _ in 0..5 {
            b.heartbeat_tick();
            let req = GossipMessage::Request { digest: scuttle::digest(&b.core.lock().unwrap().gossiper.table) };
            let resp = a.handle_message(req).unwrap();
            if let Some(second) = b.handle_message(resp) {
                a.handle_message(second);
            }
            scheduler.advance(std::time::Duration::from_secs(1));
        }

        assert!(a.peer("b:9000").unwrap().is_alive());
    }

    #[test]
    fn seed_admits_empty_not_yet_alive_peers_without_a_round_trip() {
        let scheduler = ManualClock::new();
        let a = handle("a:9000", scheduler);
        a.seed(&["b:9000".to_string(), "c:9000".to_string()]);

        let b = a.peer("b:9000").unwrap();
        assert!(!b.is_alive());
        assert_eq!(b.max_version_seen(), 0);
        assert!(a.peer("c:9000").is_some());

        // Digest now advertises the seeded peers at version 0.
        assert_eq!(a.digest().get("b:9000"), Some(&0));
    }

    #[test]
    fn seeding_an_already_known_peer_does_not_clobber_its_state() {
        let scheduler = ManualClock::new();
        let a = handle("a:9000", scheduler.clone());
        let b = handle("b:9000", scheduler);

        b.set("role", Value::from("replica"));
        let request = GossipMessage::Request { digest: scuttle::digest(&b.core.lock().unwrap().gossiper.table) };
        let first = a.handle_message(request).unwrap();
        b.handle_message(first);

        a.seed(&["b:9000".to_string()]);
        assert_eq!(a.peer_value("b:9000", "role"), Some(Value::from("replica")));
    }
}
