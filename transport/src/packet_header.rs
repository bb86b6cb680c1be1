use anyhow::bail;
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use crate::message_id::MessageId;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct HeaderFlags: u8 {
        /// the sender retransmits this datagram until it is acknowledged
        const GUARANTEED  = 0b0000_0001;
        /// the sender flushed this datagram without waiting for the send interval
        const IMMEDIATE   = 0b0000_0010;
        /// the payload is a response to an earlier request of the receiver
        const IS_RESPONSE = 0b0000_0100;
    }
}

/// Delivery semantics requested by the application for a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    FireAndForget,
    Guaranteed,
    /// guaranteed, and delivered to the peer as a response
    GuaranteedResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    pub mode: SendMode,
    /// send on the next scheduler tick rather than waiting for the send interval
    pub immediate: bool,
}

impl SendOptions {
    pub fn fire_and_forget() -> SendOptions {
        SendOptions { mode: SendMode::FireAndForget, immediate: false }
    }

    pub fn guaranteed() -> SendOptions {
        SendOptions { mode: SendMode::Guaranteed, immediate: false }
    }

    pub fn guaranteed_response() -> SendOptions {
        SendOptions { mode: SendMode::GuaranteedResponse, immediate: false }
    }

    pub fn immediate(self) -> SendOptions {
        SendOptions { immediate: true, ..self }
    }

    pub fn is_guaranteed(&self) -> bool {
        self.mode != SendMode::FireAndForget
    }

    pub fn header_flags(&self) -> HeaderFlags {
        let mut flags = match self.mode {
            SendMode::FireAndForget => HeaderFlags::empty(),
            SendMode::Guaranteed => HeaderFlags::GUARANTEED,
            SendMode::GuaranteedResponse => HeaderFlags::GUARANTEED | HeaderFlags::IS_RESPONSE,
        };
        if self.immediate {
            flags |= HeaderFlags::IMMEDIATE;
        }
        flags
    }
}

/// Fixed size header at the start of every CDP datagram, see the crate documentation for the
///  wire layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: HeaderFlags,
    pub message_id: MessageId,
}

impl PacketHeader {
    pub const SIGNATURE: [u8; 4] = *b"EQDP";
    pub const PROTOCOL_VERSION: u8 = 9;
    pub const SERIALIZED_LEN: usize = Self::SIGNATURE.len() + size_of::<u8>() + size_of::<u8>() + size_of::<i16>();

    pub fn new(flags: HeaderFlags, message_id: MessageId) -> PacketHeader {
        PacketHeader { flags, message_id }
    }

    /// header for a datagram that carries only acknowledgements
    pub fn for_status() -> PacketHeader {
        PacketHeader::new(HeaderFlags::empty(), MessageId::NONE)
    }

    pub fn is_guaranteed(&self) -> bool {
        self.flags.contains(HeaderFlags::GUARANTEED)
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(HeaderFlags::IS_RESPONSE)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&Self::SIGNATURE);
        buf.put_u8(Self::PROTOCOL_VERSION);
        buf.put_u8(self.flags.bits());
        buf.put_i16(self.message_id.to_raw());
    }

    /// Checks signature and protocol version. Flag bits without a meaning in this protocol
    ///  version are ignored.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("datagram of {} bytes is too short for a packet header", buf.remaining());
        }

        let mut signature = [0u8; 4];
        buf.copy_to_slice(&mut signature);
        if signature != Self::SIGNATURE {
            bail!("foreign signature {:?}", signature);
        }

        let protocol_version = buf.try_get_u8()?;
        if protocol_version != Self::PROTOCOL_VERSION {
            bail!("unsupported protocol version {}", protocol_version);
        }

        let flags = HeaderFlags::from_bits_truncate(buf.try_get_u8()?);
        let message_id = MessageId::from_raw(buf.try_get_i16()?);

        Ok(PacketHeader { flags, message_id })
    }
}
