// ABOUTME: Per-host ordered connection sequence: outbound-preferred lookup, O(1) splice
// ABOUTME: Owned exclusively by the channel; mutated only on connection birth/death

use std::collections::HashMap;

use crate::connection::{ConnId, ConnectionHandle, Direction};

/// Maps `host:port` to the ordered sequence of live connections to that
/// peer. Outbound connections are inserted at the head, inbound at the
/// tail; lookup returns the head, so an outbound connection is always
/// preferred over an inbound one to the same peer.
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<String, Vec<ConnectionHandle>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host_port: String, handle: ConnectionHandle) {
        let seq = self.peers.entry(host_port).or_default();
        match handle.direction() {
            Direction::Out => seq.insert(0, handle),
            Direction::In => seq.push(handle),
        }
    }

    pub fn get(&self, host_port: &str) -> Option<ConnectionHandle> {
        self.peers.get(host_port).and_then(|seq| seq.first().cloned())
    }

    /// Splice a specific connection out of its peer's sequence. Whichever
    /// handle is now first becomes preferred; there is no promotion step.
    pub fn remove(&mut self, host_port: &str, conn_id: ConnId) {
        if let Some(seq) = self.peers.get_mut(host_port) {
            seq.retain(|h| h.id() != conn_id);
            if seq.is_empty() {
                self.peers.remove(host_port);
            }
        }
    }
}
