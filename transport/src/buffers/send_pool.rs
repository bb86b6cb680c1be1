use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;
use crate::backpressure::PoolCapacity;
use crate::buffers::outbound_buffer::OutboundBuffer;
use crate::config::CdpConfig;
use crate::message_id::MessageId;
use crate::packet_header::SendOptions;

/// The guaranteed outbound buffers of an endpoint, retained until they are acknowledged or
///  their retry budget and grace period are exhausted. The pool never holds more than its
///  capacity.
pub struct OutboundPool {
    config: Arc<CdpConfig>,
    capacity: PoolCapacity,
    buffers: Vec<OutboundBuffer>,
}

impl OutboundPool {
    pub fn new(config: Arc<CdpConfig>, capacity: PoolCapacity) -> OutboundPool {
        OutboundPool {
            config,
            capacity,
            buffers: Vec::with_capacity(capacity.get()),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.capacity.is_reached_by(self.buffers.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundBuffer> {
        self.buffers.iter()
    }

    /// A buffer can take another message if it goes to the same destination with the same
    ///  options, was not transmitted yet, is still below the coalescing threshold, and has
    ///  room for the message.
    pub fn find_reusable(&mut self, destination: SocketAddr, options: SendOptions, payload_len: usize) -> Option<&mut OutboundBuffer> {
        let min_send_buffer = self.config.min_send_buffer;
        let max_datagram_payload = self.config.max_datagram_payload;

        self.buffers.iter_mut()
            .find(|b| b.destination() == destination
                && b.options() == options
                && b.is_untransmitted()
                && b.len() < min_send_buffer
                && b.has_room_for(payload_len, max_datagram_payload))
    }

    /// Appends the message to a reusable buffer if there is one, returning that buffer's id
    pub fn append_to_reusable(&mut self, destination: SocketAddr, options: SendOptions, payload: &[u8]) -> Option<MessageId> {
        let config = self.config.clone();
        let buffer = self.find_reusable(destination, options, payload.len())?;
        trace!("coalescing message into pending datagram {:?} for {:?}", buffer.message_id(), destination);
        buffer.append_data(payload);
        Self::expedite_if_due(&config, buffer);
        Some(buffer.message_id())
    }

    /// Adds a new buffer holding the message. Callers check [OutboundPool::is_at_capacity] first.
    pub fn enqueue(&mut self, destination: SocketAddr, options: SendOptions, message_id: MessageId, payload: &[u8]) {
        assert!(!self.is_at_capacity(), "this is a bug: outbound pool is at capacity");

        let mut buffer = OutboundBuffer::new(destination, options, message_id, self.config.max_datagram_payload);
        buffer.append_data(payload);
        Self::expedite_if_due(&self.config, &mut buffer);
        trace!("new pending datagram {:?} for {:?}", message_id, destination);
        self.buffers.push(buffer);
    }

    fn expedite_if_due(config: &CdpConfig, buffer: &mut OutboundBuffer) {
        if buffer.options().immediate || buffer.fill_ratio(config.max_datagram_payload) >= config.force_flush_fill_ratio {
            buffer.expire_send_timeout(config.send_timeout);
        }
    }

    pub fn remove_by_id(&mut self, message_id: MessageId) -> Option<OutboundBuffer> {
        let idx = self.buffers.iter().position(|b| b.message_id() == message_id)?;
        Some(self.buffers.remove(idx))
    }

    pub fn expire_all_send_timeouts(&mut self) {
        for buffer in &mut self.buffers {
            buffer.expire_send_timeout(self.config.send_timeout);
        }
    }

    pub fn retain_mut(&mut self, f: impl FnMut(&mut OutboundBuffer) -> bool) {
        self.buffers.retain_mut(f);
    }

    /// discards all buffers, returning their number
    pub fn clear(&mut self) -> usize {
        let result = self.buffers.len();
        self.buffers.clear();
        result
    }
}
