//! Wire transport for `gossip-core`'s digest/delta exchange.
//!
//! `gossip-core::GossiperHandle` never touches a socket; it speaks in
//! [`gossip_core::GossipMessage`] values. This crate is the thin layer that
//! gets those values on and off the wire — UDP in production, an in-memory
//! channel in tests — mirroring `chrysalis-sync::transport`'s `Transport`
//! trait and its `InMemoryTransport` test double.

mod address;
mod in_memory;
mod udp;

pub use address::{peer_name_to_socket_addr, socket_addr_to_peer_name};
pub use in_memory::InMemoryTransport;
pub use udp::UdpTransport;

use async_trait::async_trait;
use gossip_core::GossipMessage;
use thiserror::Error;

/// Errors raised moving bytes on and off the wire. Kept separate from
/// `gossip_core::GossipError`: the core protocol state machine and the I/O
/// layer fail independently, and a caller retrying a send shouldn't need to
/// know anything about digest/delta semantics to do so.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no usable endpoint: bound to a wildcard address with no advertise address set")]
    MissingEndpoint,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse peer name {0:?} as a socket address")]
    BadPeerName(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("not connected to {0}")]
    NotConnected(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Moves [`GossipMessage`]s between this node and named peers.
///
/// Peer names are the same `HOST:PORT` strings used as gossip peer
/// identities throughout `gossip-core` — there is deliberately no separate
/// "connection handle" type, since UDP gossip is connectionless and the
/// in-memory test double has no connections to manage either.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to `peer`. Best-effort: a dropped UDP datagram is
    /// not reported as an error, matching the protocol's own tolerance for
    /// lost gossip rounds.
    async fn send(&self, peer: &str, message: GossipMessage) -> TransportResult<()>;

    /// Drain whatever messages have arrived since the last call.
    /// Non-blocking: returns an empty vector rather than waiting.
    async fn receive(&self) -> TransportResult<Vec<(String, GossipMessage)>>;

    /// The address this transport is bound to, as a peer name.
    fn local_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_pair_round_trips_a_message() {
        let (a, b) = InMemoryTransport::create_pair("a:9000", "b:9000");
        let message = GossipMessage::Request { digest: Default::default() };
        a.send("b:9000", message.clone()).await.unwrap();

        let received = b.receive().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "a:9000");
    }
}
