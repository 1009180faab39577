//! Leader election recipe.
//!
//! Ported from `txgossip.recipies.LeaderElectionMixin`: every node publishes
//! a priority, waits for the priority to settle, votes for the
//! highest-priority live peer (ties broken by a hash of the name so every
//! node converges on the same answer independently), and once every live
//! peer's vote agrees, declares that peer the leader.
//!
//! Reworked from a mixin into a `Participant` implementation: instead of a
//! base class a node's type inherits from, this is a small struct wrapping
//! a user-supplied [`LeaderElected`] callback.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use gossip_core::{Effects, GossiperHandle, Participant, PeerState};
use serde_json::Value;

pub const PRIORITY_KEY: &str = "leader:priority";
pub const VOTE_KEY: &str = "leader:vote";
pub const LEADER_KEY: &str = "leader:leader";

/// How long after a priority change to wait before casting a vote, giving
/// the change a few gossip rounds to propagate first.
const ELECTION_DELAY: Duration = Duration::from_secs(5);

/// Notified once this node's view of the cluster settles on a leader.
pub trait LeaderElected: Send {
    fn leader_elected(&mut self, is_leader: bool, leader: String);
}

/// A `Participant` that runs the election protocol and reports the outcome
/// through a caller-supplied [`LeaderElected`].
pub struct LeaderElectionParticipant<F: LeaderElected> {
    callback: F,
    handle: Arc<OnceLock<GossiperHandle>>,
    vote_timer: Mutex<Option<gossip_core::TimerHandle>>,
    current_leader: Option<String>,
}

impl<F: LeaderElected> LeaderElectionParticipant<F> {
    /// Builds the participant plus a cell the caller must fill with the
    /// live [`GossiperHandle`] right after `gossip_core::start` returns one.
    /// The participant needs a handle to arm its vote timer, but `start`
    /// needs the participant constructed first — the cell breaks that
    /// chicken-and-egg dependency without unsafe code.
    pub fn new(callback: F) -> (Self, Arc<OnceLock<GossiperHandle>>) {
        let cell = Arc::new(OnceLock::new());
        (
            LeaderElectionParticipant {
                callback,
                handle: cell.clone(),
                vote_timer: Mutex::new(None),
                current_leader: None,
            },
            cell,
        )
    }

    /// Announce this node's candidacy by writing its priority. Election
    /// itself fires five seconds later, once the gossiper's handle is
    /// wired in.
    pub fn announce(handle: &GossiperHandle, priority: i64) {
        handle.set(PRIORITY_KEY, Value::from(priority));
    }

    fn start_election(&self) {
        let Some(handle) = self.handle.get().cloned() else {
            return;
        };
        let scheduler = handle.scheduler();
        let timer = scheduler.call_later(ELECTION_DELAY, Box::new(move || cast_vote(&handle)));
        *self.vote_timer.lock().unwrap() = Some(timer);
    }

    /// First stage: once every live peer's vote agrees with this node's own,
    /// publish the agreed-upon winner under `LEADER_KEY`. This does not yet
    /// declare a leader — that only happens once `LEADER_KEY` itself reaches
    /// the same consensus, one more gossip round later.
    fn check_vote_consensus(&mut self, effects: &mut Effects<'_>) {
        let Some(self_vote) = effects.get(VOTE_KEY).and_then(Value::as_str).map(str::to_string) else {
            return;
        };

        for peer in effects.live_peers() {
            match peer.get(VOTE_KEY).and_then(Value::as_str) {
                Some(vote) if vote == self_vote => continue,
                _ => return, // not everyone has voted, or voted differently
            }
        }

        if effects.get(LEADER_KEY).and_then(Value::as_str) != Some(self_vote.as_str()) {
            effects.set(LEADER_KEY, Value::from(self_vote));
        }
    }

    /// Second stage: only once every live peer's `LEADER_KEY` agrees is the
    /// election actually settled and the callback fired.
    fn check_leader_consensus(&mut self, effects: &Effects<'_>) {
        let Some(self_leader) = effects.get(LEADER_KEY).and_then(Value::as_str).map(str::to_string) else {
            return;
        };

        for peer in effects.live_peers() {
            match peer.get(LEADER_KEY).and_then(Value::as_str) {
                Some(leader) if leader == self_leader => continue,
                _ => return,
            }
        }

        if self.current_leader.as_deref() != Some(self_leader.as_str()) {
            tracing::info!(leader = %self_leader, "leader election reached consensus");
            self.current_leader = Some(self_leader.clone());
            let is_leader = self_leader == effects.self_name();
            self.callback.leader_elected(is_leader, self_leader);
        }
    }
}

/// Pick the live peer (self included) with the highest priority, tie-broken
/// by a hash of the name, and publish that as this node's vote.
fn cast_vote(handle: &GossiperHandle) {
    let mut candidates: Vec<(String, i64)> = Vec::new();
    if let Some(priority) = handle.get(PRIORITY_KEY).and_then(|v| v.as_i64()) {
        candidates.push((handle.name(), priority));
    }
    for peer in handle.live_peers() {
        if let Some(priority) = peer.get(PRIORITY_KEY).and_then(Value::as_i64) {
            candidates.push((peer.name().to_string(), priority));
        }
    }
    if candidates.is_empty() {
        return;
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| hash_of(&b.0).cmp(&hash_of(&a.0))));
    let winner = candidates[0].0.clone();
    if handle.get(VOTE_KEY).and_then(|v| v.as_str().map(str::to_string)) == Some(winner.clone()) {
        return;
    }
    handle.set(VOTE_KEY, Value::from(winner));
}

fn hash_of(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

impl<F: LeaderElected> Participant for LeaderElectionParticipant<F> {
    fn value_changed(&mut self, effects: &mut Effects<'_>, _peer: &PeerState, key: &str, _value: &Value) {
        match key {
            PRIORITY_KEY => self.start_election(),
            VOTE_KEY => self.check_vote_consensus(effects),
            LEADER_KEY => self.check_leader_consensus(effects),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossip_core::{start, GossipMessage, DEFAULT_PHI_THRESHOLD};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingCallback {
        elected: Arc<AtomicBool>,
        is_leader: Arc<AtomicBool>,
    }

    impl LeaderElected for RecordingCallback {
        fn leader_elected(&mut self, is_leader: bool, _leader: String) {
            self.elected.store(true, Ordering::SeqCst);
            self.is_leader.store(is_leader, Ordering::SeqCst);
        }
    }

    #[test]
    fn tie_break_hash_is_a_total_order() {
        // Same priority, different names: exactly one of the two hash
        // comparisons should win, never a tie in practice.
        assert_ne!(hash_of("a:9000"), hash_of("b:9000"));
    }

    #[test]
    fn single_node_elects_itself_leader() {
        let clock = gossip_core::ManualClock::new();
        let elected = Arc::new(AtomicBool::new(false));
        let is_leader = Arc::new(AtomicBool::new(false));
        let (participant, cell) = LeaderElectionParticipant::new(RecordingCallback {
            elected: elected.clone(),
            is_leader: is_leader.clone(),
        });

        let handle = start("solo:9000", DEFAULT_PHI_THRESHOLD, Box::new(participant), clock.clone()).unwrap();
        cell.set(handle.clone()).ok();

        LeaderElectionParticipant::<RecordingCallback>::announce(&handle, 10);
        clock.advance(ELECTION_DELAY);

        assert!(elected.load(Ordering::SeqCst));
        assert!(is_leader.load(Ordering::SeqCst));
    }

    #[test]
    fn casting_the_same_vote_twice_does_not_bump_its_version() {
        let clock = gossip_core::ManualClock::new();
        let (participant, cell) = LeaderElectionParticipant::new(RecordingCallback {
            elected: Arc::new(AtomicBool::new(false)),
            is_leader: Arc::new(AtomicBool::new(false)),
        });
        let handle = start("solo:9000", DEFAULT_PHI_THRESHOLD, Box::new(participant), clock.clone()).unwrap();
        cell.set(handle.clone()).ok();

        LeaderElectionParticipant::<RecordingCallback>::announce(&handle, 10);
        clock.advance(ELECTION_DELAY);
        let version_after_first_vote = handle.peer(&handle.name()).unwrap().version_of(VOTE_KEY);

        // Re-casting with the same candidates (nothing changed) must not
        // bump the attribute's version, or every idle election cycle would
        // churn gossip chatter for no reason.
        cast_vote(&handle);
        let version_after_second_vote = handle.peer(&handle.name()).unwrap().version_of(VOTE_KEY);
        assert_eq!(version_after_first_vote, version_after_second_vote);
    }

    /// Drive one full three-phase exchange with `initiator` requesting
    /// against `target`, applying every reply along the way.
    fn exchange(initiator: &GossiperHandle, target: &GossiperHandle) {
        use std::collections::HashMap;
        let mut table = HashMap::new();
        for peer in initiator.live_peers().into_iter().chain(initiator.dead_peers()) {
            table.insert(peer.name().to_string(), peer);
        }
        if let Some(me) = initiator.peer(&initiator.name()) {
            table.insert(me.name().to_string(), me);
        }
        let request = GossipMessage::Request { digest: gossip_core::scuttle::digest(&table) };
        let first_response = target.handle_message(request).expect("request always answered");
        let second_response = initiator.handle_message(first_response);
        if let Some(second_response) = second_response {
            target.handle_message(second_response);
        }
    }

    /// Bring `a` and `b` to mutual liveness: one heartbeat each way, synced
    /// by an exchange, then enough elapsed time for the detector to clear.
    fn make_mutually_alive(a: &GossiperHandle, b: &GossiperHandle, clock: &Arc<gossip_core::ManualClock>) {
        b.heartbeat_tick();
        exchange(a, b);
        a.heartbeat_tick();
        exchange(b, a);
        clock.advance(Duration::from_millis(100));
        a.gossip_tick();
        b.gossip_tick();
        assert!(a.peer(&b.name()).unwrap().is_alive());
        assert!(b.peer(&a.name()).unwrap().is_alive());
    }

    fn two_node_setup() -> (GossiperHandle, GossiperHandle, Arc<gossip_core::ManualClock>, Arc<AtomicBool>, Arc<AtomicBool>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let clock = gossip_core::ManualClock::new();
        let a_elected = Arc::new(AtomicBool::new(false));
        let a_is_leader = Arc::new(AtomicBool::new(false));
        let b_elected = Arc::new(AtomicBool::new(false));
        let b_is_leader = Arc::new(AtomicBool::new(false));

        let (a_participant, a_cell) = LeaderElectionParticipant::new(RecordingCallback {
            elected: a_elected.clone(),
            is_leader: a_is_leader.clone(),
        });
        let (b_participant, b_cell) = LeaderElectionParticipant::new(RecordingCallback {
            elected: b_elected.clone(),
            is_leader: b_is_leader.clone(),
        });
        let a = start("a:9000", DEFAULT_PHI_THRESHOLD, Box::new(a_participant), clock.clone()).unwrap();
        let b = start("b:9000", DEFAULT_PHI_THRESHOLD, Box::new(b_participant), clock.clone()).unwrap();
        a_cell.set(a.clone()).ok();
        b_cell.set(b.clone()).ok();

        LeaderElectionParticipant::<RecordingCallback>::announce(&a, 5);
        LeaderElectionParticipant::<RecordingCallback>::announce(&b, 10);
        exchange(&a, &b);
        make_mutually_alive(&a, &b, &clock);

        (a, b, clock, a_elected, a_is_leader, b_elected, b_is_leader)
    }

    #[test]
    fn vote_consensus_alone_does_not_proclaim_a_leader() {
        let (a, b, clock, a_elected, _, b_elected, _) = two_node_setup();

        clock.advance(ELECTION_DELAY);
        // Each side casts its own vote for "b:9000" (the higher priority),
        // but hasn't yet heard the other's vote.
        assert_eq!(a.get(VOTE_KEY), Some(Value::from("b:9000")));
        assert_eq!(b.get(VOTE_KEY), Some(Value::from("b:9000")));

        // One exchange round lets each side learn the other's vote and
        // reach vote consensus, which only writes `LEADER_KEY` locally.
        exchange(&a, &b);
        assert_eq!(a.get(LEADER_KEY), Some(Value::from("b:9000")));
        assert_eq!(b.get(LEADER_KEY), Some(Value::from("b:9000")));
        assert!(!a_elected.load(Ordering::SeqCst));
        assert!(!b_elected.load(Ordering::SeqCst));
    }

    #[test]
    fn leader_is_proclaimed_once_leader_key_also_reaches_consensus() {
        let (a, b, clock, a_elected, a_is_leader, b_elected, b_is_leader) = two_node_setup();

        clock.advance(ELECTION_DELAY);
        exchange(&a, &b); // vote consensus on each side, LEADER_KEY set locally
        assert!(!a_elected.load(Ordering::SeqCst));
        assert!(!b_elected.load(Ordering::SeqCst));

        exchange(&a, &b); // LEADER_KEY now crosses the wire and reaches consensus
        assert!(a_elected.load(Ordering::SeqCst));
        assert!(b_elected.load(Ordering::SeqCst));
        assert!(!a_is_leader.load(Ordering::SeqCst));
        assert!(b_is_leader.load(Ordering::SeqCst));
    }
}
