use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use crate::packet_header::PacketHeader;
use crate::sub_message::SubMessageHeader;

pub struct CdpConfig {
    /// The address the endpoint's UDP socket binds to. Port 0 lets the OS pick a free port.
    pub self_addr: SocketAddr,

    /// This is the maximum payload inside a single UDP datagram. CDP never relies on IP level
    ///  fragmentation, so a datagram of this size must pass all routes between peers.
    ///
    /// The packet header and one sub-message header are part of this payload, so the biggest
    ///  application message that fits is somewhat smaller (see [CdpConfig::max_message_len]).
    pub max_datagram_payload: usize,

    /// A pooled outbound buffer accepts additional messages (i.e. is considered for coalescing)
    ///  only while its size is below this value.
    pub min_send_buffer: usize,

    /// When appending to a buffer fills it beyond this fraction of [CdpConfig::max_datagram_payload],
    ///  the buffer is sent on the next scheduler tick instead of waiting for the regular send interval.
    pub force_flush_fill_ratio: f64,

    /// Upper bound for the number of guaranteed outbound buffers waiting for acknowledgement.
    ///  Senders block (with a time bound) while the pool is at this capacity.
    pub max_queue_buffers: usize,

    /// A guaranteed buffer is transmitted at most this number of times
    pub max_send_attempts: u32,

    /// interval between consecutive transmissions of a pooled buffer
    pub send_timeout: Duration,

    /// Grace period after the last transmission attempt: if there is still no acknowledgement
    ///  after this period, the message is reported as failed and dropped.
    pub unconfirmed_remove_timeout: Duration,

    /// Time for which the receiver remembers a (peer, message id) pair to suppress redeliveries
    pub receive_dedup_timeout: Duration,

    /// Upper bound for waiting on socket readability in a single receive update
    pub receive_poll_bound: Duration,

    /// Upper bound for the number of datagrams that are read from the socket in a single
    ///  receive update, so a flooded socket can not starve the caller's loop.
    pub max_datagrams_per_update: usize,

    /// Probability of dropping a datagram in either direction. This is for simulating lossy
    ///  networks during development, and it should be 0.0 in production.
    pub loss_probability: f64,
}

impl CdpConfig {
    /// UDP payload that is safe for full Ethernet frames with some headroom for tunnels
    pub const DEFAULT_MAX_DATAGRAM_PAYLOAD: usize = 1400;
    /// Biggest UDP payload for IPV4
    pub const MAX_UDP_PAYLOAD: usize = 65507;

    pub fn new(self_addr: SocketAddr) -> CdpConfig {
        CdpConfig {
            self_addr,
            max_datagram_payload: Self::DEFAULT_MAX_DATAGRAM_PAYLOAD,
            min_send_buffer: 1024,
            force_flush_fill_ratio: 0.7,
            max_queue_buffers: 16,
            max_send_attempts: 5,
            send_timeout: Duration::from_millis(10),
            unconfirmed_remove_timeout: Duration::from_millis(1000),
            receive_dedup_timeout: Duration::from_millis(1500),
            receive_poll_bound: Duration::from_millis(20),
            max_datagrams_per_update: 1024,
            loss_probability: 0.0,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_payload <= PacketHeader::SERIALIZED_LEN + SubMessageHeader::SERIALIZED_LEN {
            bail!("max datagram payload {} leaves no room for message data", self.max_datagram_payload);
        }
        if self.max_datagram_payload > Self::MAX_UDP_PAYLOAD {
            bail!("max datagram payload {} exceeds the maximum UDP payload of {}", self.max_datagram_payload, Self::MAX_UDP_PAYLOAD);
        }
        if self.min_send_buffer > self.max_datagram_payload {
            bail!("min send buffer {} is bigger than max datagram payload {}", self.min_send_buffer, self.max_datagram_payload);
        }
        if !(self.force_flush_fill_ratio > 0.0 && self.force_flush_fill_ratio <= 1.0) {
            bail!("force flush fill ratio must be in (0, 1], was {}", self.force_flush_fill_ratio);
        }
        if self.max_queue_buffers == 0 {
            bail!("max queue buffers must be positive");
        }
        if self.max_send_attempts == 0 {
            bail!("max send attempts must be positive");
        }
        if self.send_timeout.is_zero() {
            bail!("send timeout must be positive");
        }
        if self.max_datagrams_per_update == 0 {
            bail!("max datagrams per update must be positive");
        }
        if !(0.0..1.0).contains(&self.loss_probability) {
            bail!("loss probability must be in [0, 1), was {}", self.loss_probability);
        }
        Ok(())
    }

    /// The biggest application message that fits into a single datagram
    pub fn max_message_len(&self) -> usize {
        self.max_datagram_payload - PacketHeader::SERIALIZED_LEN - SubMessageHeader::SERIALIZED_LEN
    }

    /// The time a sender waits for a free slot when the outbound pool is at capacity: one send
    ///  interval per pooled buffer
    pub fn backpressure_wait_bound(&self, pool_len: usize) -> Duration {
        self.send_timeout * pool_len.try_into().unwrap_or(u32::MAX)
    }
}
