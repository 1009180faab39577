//! Recipes built on top of `gossip-core`'s `Participant` interface: leader
//! election and a replicated key-value store, ported from
//! `txgossip.recipies`.

pub mod key_value_store;
pub mod leader_election;

pub use key_value_store::{KeyChanged, KeyValueStoreParticipant};
pub use leader_election::{LeaderElected, LeaderElectionParticipant};
