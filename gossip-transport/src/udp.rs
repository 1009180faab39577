//! UDP transport.
//!
//! Mirrors `chrysalis-sync::transport::HttpTransport` in shape (a thin
//! wrapper around an I/O handle plus a `Transport` impl) but is
//! connectionless like the original `txgossip.gossip.Gossiper`, which is
//! itself a `DatagramProtocol`.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use gossip_core::GossipMessage;
use tokio::net::UdpSocket;

use crate::address::{peer_name_to_socket_addr, socket_addr_to_peer_name};
use crate::{Transport, TransportError, TransportResult};

/// Largest datagram this transport will attempt to read. A gossip digest or
/// delta batch that doesn't fit is dropped with a logged warning rather than
/// truncated into a corrupt message.
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpTransport {
    socket: UdpSocket,
    local_name: String,
    inbox: Mutex<VecDeque<(String, GossipMessage)>>,
}

impl UdpTransport {
    /// Bind a UDP socket at `bind_addr`. Refuses a wildcard bind address
    /// (`0.0.0.0`) with no way to derive a peer name other peers could dial
    /// back — mirrors `txgossip`'s refusal to guess an advertise address.
    pub async fn bind(bind_addr: &str) -> TransportResult<Self> {
        let socket_addr = peer_name_to_socket_addr(bind_addr)?;
        if socket_addr.ip().is_unspecified() {
            return Err(TransportError::MissingEndpoint);
        }
        let socket = UdpSocket::bind(socket_addr).await?;
        let local_name = socket_addr_to_peer_name(socket.local_addr()?);
        Ok(UdpTransport {
            socket,
            local_name,
            inbox: Mutex::new(VecDeque::new()),
        })
    }

    /// Read every datagram currently available without blocking, decoding
    /// each as a JSON-encoded [`GossipMessage`]. Malformed payloads and
    /// payloads from peers whose address doesn't parse back to a peer name
    /// are logged and silently dropped, never surfaced as an error — one bad
    /// datagram should never stall the gossip loop.
    pub async fn poll(&self) -> TransportResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    let peer = socket_addr_to_peer_name(from);
                    match serde_json::from_slice::<GossipMessage>(&buf[..len]) {
                        Ok(message) => {
                            self.inbox.lock().unwrap().push_back((peer, message));
                        }
                        Err(err) => {
                            tracing::warn!(%peer, %err, "dropping malformed gossip datagram");
                        }
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, peer: &str, message: GossipMessage) -> TransportResult<()> {
        let addr = peer_name_to_socket_addr(peer)?;
        let payload = serde_json::to_vec(&message)?;
        self.socket.send_to(&payload, addr).await?;
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Vec<(String, GossipMessage)>> {
        self.poll().await?;
        let mut inbox = self.inbox.lock().unwrap();
        Ok(inbox.drain(..).collect())
    }

    fn local_name(&self) -> &str {
        &self.local_name
    }
}
