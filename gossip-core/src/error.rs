//! Error types owned by the core protocol state machine.
//!
//! Transport-level failures (socket errors, malformed wire bytes) are a
//! separate concern owned by `gossip-transport`'s own error type — the core
//! state machine never touches a socket and should not need to know how one
//! can fail.

use thiserror::Error;

/// Errors raised by `gossip-core` itself.
#[derive(Debug, Error)]
pub enum GossipError {
    /// Raised at startup when no bind address could be determined — ported
    /// from `txgossip`'s refusal to guess an outbound address when bound to
    /// `0.0.0.0` with no explicit advertise address configured. Fatal: the
    /// caller should abort startup.
    #[error("no usable endpoint: bound to a wildcard address with no advertise address set")]
    MissingEndpoint,

    /// A digest, delta, or gossip round referenced a peer name this node has
    /// never heard of. Logged and ignored by the gossiper itself; surfaced
    /// here so a caller driving the exchange manually can see it happened.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The local participant was asked to start twice.
    #[error("gossiper already started")]
    AlreadyStarted,
}
