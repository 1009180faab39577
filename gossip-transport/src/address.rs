//! Conversions between gossip peer names and socket addresses.
//!
//! Peer names are always the bound `HOST:PORT` string, ported from
//! `txgossip`'s `_address_from_peer_name` / `_address_to_peer_name` helpers.

use std::net::SocketAddr;

use crate::TransportError;

pub fn peer_name_to_socket_addr(name: &str) -> Result<SocketAddr, TransportError> {
    name.parse()
        .map_err(|_| TransportError::BadPeerName(name.to_string()))
}

pub fn socket_addr_to_peer_name(addr: SocketAddr) -> String {
    addr.to_string()
}
