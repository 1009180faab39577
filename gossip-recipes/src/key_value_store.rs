//! Replicated key-value store recipe.
//!
//! Ported from `txgossip.recipies.KeyStoreMixin`: ordinary gossip attributes
//! doubling as a cluster-wide key-value store, with each value stamped
//! `(timestamp, value)` at write time and resolved last-write-wins across
//! every peer's copy of the same key at read time. The reserved heartbeat
//! key is always excluded from both the read-side merge and the
//! `Participant` notification.

use std::collections::HashSet;

use gossip_core::{Effects, GossiperHandle, Participant, PeerState, HEARTBEAT_KEY};
use serde_json::Value;

/// Notified whenever a non-heartbeat key changes anywhere in the cluster,
/// including the local node's own writes.
pub trait KeyChanged: Send {
    fn key_changed(&mut self, peer: &str, key: &str, value: &Value);
}

/// A `Participant` that forwards every non-heartbeat attribute write to a
/// caller-supplied [`KeyChanged`]. The actual read/write/list surface lives
/// in the free functions below, since those operate on a [`GossiperHandle`]
/// directly rather than needing to be invoked from inside a callback.
pub struct KeyValueStoreParticipant<F: KeyChanged> {
    callback: F,
}

impl<F: KeyChanged> KeyValueStoreParticipant<F> {
    pub fn new(callback: F) -> Self {
        KeyValueStoreParticipant { callback }
    }
}

impl<F: KeyChanged> Participant for KeyValueStoreParticipant<F> {
    fn value_changed(&mut self, _effects: &mut Effects<'_>, peer: &PeerState, key: &str, value: &Value) {
        if key == HEARTBEAT_KEY {
            return;
        }
        self.callback.key_changed(peer.name(), key, value);
    }
}

fn stamp(now: f64, value: Value) -> Value {
    serde_json::json!([now, value])
}

fn unstamp(stamped: &Value) -> Option<(f64, &Value)> {
    let array = stamped.as_array()?;
    let timestamp = array.first()?.as_f64()?;
    let value = array.get(1)?;
    Some((timestamp, value))
}

/// Write `key` = `value` on the local node, stamped with the current time.
pub fn set(handle: &GossiperHandle, key: &str, value: Value) {
    let now = handle.scheduler().now();
    handle.set(key, stamp(now, value));
}

/// Read `key`, resolved last-write-wins across every peer that has written
/// it (including the local node). Returns `None` if no peer has ever set
/// it, or every write found is malformed.
pub fn get(handle: &GossiperHandle, key: &str) -> Option<Value> {
    if key == HEARTBEAT_KEY {
        return None;
    }
    let mut best: Option<(f64, Value)> = None;
    let mut consider = |stamped: Option<&Value>| {
        if let Some((ts, value)) = stamped.and_then(unstamp) {
            if best.as_ref().map_or(true, |(best_ts, _)| ts > *best_ts) {
                best = Some((ts, value.clone()));
            }
        }
    };

    consider(handle.get(key).as_ref());
    for peer in handle.live_peers().into_iter().chain(handle.dead_peers()) {
        consider(peer.get(key));
    }
    best.map(|(_, value)| value)
}

/// Every key set anywhere in the cluster matching a glob `pattern`
/// (`*`/`?`/`[...]`), heartbeat excluded. `"*"` lists everything.
pub fn keys(handle: &GossiperHandle, pattern: &str) -> Vec<String> {
    let glob_pattern = glob::Pattern::new(pattern).unwrap_or_else(|_| glob::Pattern::new("*").unwrap());
    let mut all: HashSet<String> = handle.keys().into_iter().collect();
    for peer in handle.live_peers().into_iter().chain(handle.dead_peers()) {
        all.extend(peer.keys().cloned());
    }
    all.into_iter()
        .filter(|k| k != HEARTBEAT_KEY && glob_pattern.matches(k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossip_core::{start, NullParticipant, DEFAULT_PHI_THRESHOLD};
    use std::time::Duration;

    #[test]
    fn set_then_get_round_trips_locally() {
        let clock = gossip_core::ManualClock::new();
        let handle = start("a:9000", DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), clock).unwrap();
        set(&handle, "color", Value::from("blue"));
        assert_eq!(get(&handle, "color"), Some(Value::from("blue")));
    }

    #[test]
    fn later_write_elsewhere_wins_on_read() {
        let clock = gossip_core::ManualClock::new();
        let handle = start("a:9000", DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), clock.clone()).unwrap();

        set(&handle, "color", Value::from("blue"));
        clock.advance(Duration::from_secs(1));

        // A later write (higher timestamp) should win on the next read,
        // whether it lands locally or via gossip from another peer.
        handle.set("color", stamp(1000.0, Value::from("red")));
        assert_eq!(get(&handle, "color"), Some(Value::from("red")));
    }

    #[test]
    fn heartbeat_key_is_excluded_from_reads_and_listings() {
        let clock = gossip_core::ManualClock::new();
        let handle = start("a:9000", DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), clock).unwrap();
        handle.heartbeat_tick();
        assert_eq!(get(&handle, HEARTBEAT_KEY), None);
        assert!(!keys(&handle, "*").contains(&HEARTBEAT_KEY.to_string()));
    }

    #[test]
    fn glob_pattern_filters_keys() {
        let clock = gossip_core::ManualClock::new();
        let handle = start("a:9000", DEFAULT_PHI_THRESHOLD, Box::new(NullParticipant), clock).unwrap();
        set(&handle, "region:east", Value::from(1));
        set(&handle, "region:west", Value::from(2));
        set(&handle, "other", Value::from(3));

        let mut matched = keys(&handle, "region:*");
        matched.sort();
        assert_eq!(matched, vec!["region:east".to_string(), "region:west".to_string()]);
    }
}
