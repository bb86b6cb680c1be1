use std::net::SocketAddr;
use std::time::Duration;
use rustc_hash::FxHashMap;
use crate::message_id::MessageId;

/// Remembers recently received (peer, message id) pairs so that retransmissions of a datagram
///  are acknowledged again but not delivered to the application twice.
pub struct DedupLedger {
    retention: Duration,
    entries: FxHashMap<(SocketAddr, MessageId), Duration>,
}

impl DedupLedger {
    pub fn new(retention: Duration) -> DedupLedger {
        DedupLedger {
            retention,
            entries: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_any_message_with_id(&self, from: SocketAddr, message_id: MessageId) -> bool {
        self.entries.contains_key(&(from, message_id))
    }

    pub fn record(&mut self, from: SocketAddr, message_id: MessageId) {
        self.entries.insert((from, message_id), Duration::ZERO);
    }

    /// drops all entries for a peer, e.g. when its id counter is about to wrap around
    pub fn forget_peer(&mut self, from: SocketAddr) {
        self.entries.retain(|(addr, _), _| *addr != from);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// advances the age of all entries, discarding those older than the retention period
    pub fn age(&mut self, dt: Duration) {
        let retention = self.retention;
        self.entries.retain(|_, age| {
            *age += dt;
            *age <= retention
        });
    }
}
