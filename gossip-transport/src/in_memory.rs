//! In-process transport for tests — no sockets, just a shared mailbox.
//!
//! Grounded directly on `chrysalis-sync::transport::InMemoryTransport`'s
//! `Arc<Mutex<HashMap<peer, Vec<message>>>>` mailbox and `create_pair`
//! helper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gossip_core::GossipMessage;

use crate::{Transport, TransportResult};

type Mailboxes = Arc<Mutex<HashMap<String, Vec<(String, GossipMessage)>>>>;

pub struct InMemoryTransport {
    local_name: String,
    mailboxes: Mailboxes,
}

impl InMemoryTransport {
    /// Create two transports sharing a mailbox map, so sending from one
    /// immediately queues into the other's inbox.
    pub fn create_pair(name_a: impl Into<String>, name_b: impl Into<String>) -> (Self, Self) {
        let mailboxes: Mailboxes = Arc::new(Mutex::new(HashMap::new()));
        let a = InMemoryTransport {
            local_name: name_a.into(),
            mailboxes: mailboxes.clone(),
        };
        let b = InMemoryTransport {
            local_name: name_b.into(),
            mailboxes,
        };
        (a, b)
    }

    /// Add another node to an existing mailbox group (for three-or-more
    /// node test topologies).
    pub fn join(&self, name: impl Into<String>) -> Self {
        InMemoryTransport {
            local_name: name.into(),
            mailboxes: self.mailboxes.clone(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, peer: &str, message: GossipMessage) -> TransportResult<()> {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes
            .entry(peer.to_string())
            .or_default()
            .push((self.local_name.clone(), message));
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Vec<(String, GossipMessage)>> {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        Ok(mailboxes.remove(&self.local_name).unwrap_or_default())
    }

    fn local_name(&self) -> &str {
        &self.local_name
    }
}
