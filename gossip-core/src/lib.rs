//! Scuttlebutt-style anti-entropy gossip with Phi Accrual failure detection.
//!
//! This crate is transport-agnostic: [`Gossiper`]-driving code lives behind
//! [`GossiperHandle`], which exposes the three-phase digest/delta exchange
//! as plain message-in, message-out calls. Wiring a socket (or an
//! in-process channel, for tests) to those calls is `gossip-transport`'s
//! job.

pub mod clock;
pub mod detector;
pub mod error;
pub mod gossiper;
pub mod participant;
pub mod scuttle;
pub mod state;

pub use clock::{Clock, ManualClock, Scheduler, TimerHandle, TokioClock};
pub use detector::FailureDetector;
pub use error::GossipError;
pub use gossiper::{start, start_timers, GossipMessage, GossiperHandle};
pub use participant::{Effects, NullParticipant, Participant};
pub use scuttle::{Delta, Digest};
pub use state::{PeerState, DEFAULT_PHI_THRESHOLD, HEARTBEAT_KEY};
