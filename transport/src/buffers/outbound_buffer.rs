use std::net::SocketAddr;
use std::time::Duration;
use bytes::BytesMut;
use tokio::time::Instant;
use crate::message_id::MessageId;
use crate::packet_header::{PacketHeader, SendOptions};
use crate::sub_message::{ser_sub_message, SubMessageHeader, SubMessageKind};

/// A datagram under construction or awaiting acknowledgement. It starts with a serialized
///  [PacketHeader] followed by one or more Data sub-messages, all for the same destination.
pub struct OutboundBuffer {
    buf: BytesMut,
    destination: SocketAddr,
    options: SendOptions,
    message_id: MessageId,

    /// number of transmissions so far
    pub send_times: u32,
    /// time since the last transmission (or since creation)
    pub sent_timeout: Duration,
    /// time since the retry budget was exhausted
    pub remove_timeout: Duration,
    pub last_sent_at: Option<Instant>,
}

impl OutboundBuffer {
    pub fn new(destination: SocketAddr, options: SendOptions, message_id: MessageId, capacity: usize) -> OutboundBuffer {
        let mut buf = BytesMut::with_capacity(capacity);
        PacketHeader::new(options.header_flags(), message_id)
            .ser(&mut buf);

        OutboundBuffer {
            buf,
            destination,
            options,
            message_id,
            send_times: 0,
            sent_timeout: Duration::ZERO,
            remove_timeout: Duration::ZERO,
            last_sent_at: None,
        }
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn options(&self) -> SendOptions {
        self.options
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// callers ensure the data sub-message fits, see [OutboundBuffer::has_room_for]
    pub fn append_data(&mut self, payload: &[u8]) {
        ser_sub_message(SubMessageKind::Data, payload, &mut self.buf);
    }

    pub fn has_room_for(&self, payload_len: usize, max_datagram_payload: usize) -> bool {
        self.buf.len() + SubMessageHeader::SERIALIZED_LEN + payload_len <= max_datagram_payload
    }

    pub fn fill_ratio(&self, max_datagram_payload: usize) -> f64 {
        self.buf.len() as f64 / max_datagram_payload as f64
    }

    pub fn is_untransmitted(&self) -> bool {
        self.send_times == 0
    }

    /// makes the buffer due for transmission on the next scheduler tick
    pub fn expire_send_timeout(&mut self, send_timeout: Duration) {
        self.sent_timeout = self.sent_timeout.max(send_timeout);
    }
}
