use anyhow::bail;
use bytes::{Buf, BufMut};
use crate::message_handler::DeliveryStatus;
use crate::message_id::MessageId;
use crate::packet_header::PacketHeader;
use crate::safe_converter::{PrecheckedCast, SafeCast};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubMessageKind {
    /// application payload
    Data,
    /// acknowledgement for a guaranteed datagram, see [StatusPayload]
    Status,
    /// a kind this protocol version does not know - skipped by the receiver
    Unknown(u16),
}

impl SubMessageKind {
    const DATA: u16 = 0xda1a;
    const STATUS: u16 = 0x51a1;

    pub fn from_raw(raw: u16) -> SubMessageKind {
        match raw {
            Self::DATA => SubMessageKind::Data,
            Self::STATUS => SubMessageKind::Status,
            other => SubMessageKind::Unknown(other),
        }
    }

    pub fn to_raw(&self) -> u16 {
        match self {
            SubMessageKind::Data => Self::DATA,
            SubMessageKind::Status => Self::STATUS,
            SubMessageKind::Unknown(raw) => *raw,
        }
    }
}

/// Header in front of every sub-message. `size` covers the header itself and the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMessageHeader {
    pub kind: SubMessageKind,
    pub size: u16,
}

impl SubMessageHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u16>() + size_of::<u16>();

    pub fn for_payload(kind: SubMessageKind, payload_len: usize) -> SubMessageHeader {
        SubMessageHeader {
            kind,
            size: (Self::SERIALIZED_LEN + payload_len).prechecked_cast(),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.kind.to_raw());
        buf.put_u16(self.size);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SubMessageHeader> {
        let kind = SubMessageKind::from_raw(buf.try_get_u16()?);
        let size = buf.try_get_u16()?;
        Ok(SubMessageHeader { kind, size })
    }
}

pub fn ser_sub_message(kind: SubMessageKind, payload: &[u8], buf: &mut impl BufMut) {
    SubMessageHeader::for_payload(kind, payload.len()).ser(buf);
    buf.put_slice(payload);
}

/// Payload of a [SubMessageKind::Status] sub-message, acknowledging a guaranteed datagram.
///  A status code of 0 means success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusPayload {
    pub message_id: MessageId,
    pub status: i16,
}

impl StatusPayload {
    pub const SERIALIZED_LEN: usize = size_of::<i16>() + size_of::<i16>();

    pub const STATUS_OK: i16 = 0;
    pub const STATUS_FAILED: i16 = 1;

    pub fn new(message_id: MessageId, delivery_status: DeliveryStatus) -> StatusPayload {
        StatusPayload {
            message_id,
            status: match delivery_status {
                DeliveryStatus::Delivered => Self::STATUS_OK,
                DeliveryStatus::Failed => Self::STATUS_FAILED,
            },
        }
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.status == Self::STATUS_OK {
            DeliveryStatus::Delivered
        }
        else {
            DeliveryStatus::Failed
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.message_id.to_raw());
        buf.put_i16(self.status);
    }

    /// writes a complete Status sub-message including its header
    pub fn ser_sub_message(&self, buf: &mut impl BufMut) {
        SubMessageHeader::for_payload(SubMessageKind::Status, Self::SERIALIZED_LEN).ser(buf);
        self.ser(buf);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<StatusPayload> {
        let message_id = MessageId::from_raw(buf.try_get_i16()?);
        let status = buf.try_get_i16()?;
        Ok(StatusPayload { message_id, status })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMessage<'a> {
    pub kind: SubMessageKind,
    pub payload: &'a [u8],
}

/// Iterates over the sub-messages following a packet header. Iteration stops at the first
///  malformed sub-message header (truncated, size smaller than the header, or size beyond the
///  end of the datagram), keeping everything before it.
pub struct SubMessageIter<'a> {
    remaining: &'a [u8],
}

impl<'a> SubMessageIter<'a> {
    pub fn new(buf: &'a [u8]) -> SubMessageIter<'a> {
        SubMessageIter { remaining: buf }
    }
}

impl<'a> Iterator for SubMessageIter<'a> {
    type Item = SubMessage<'a>;

    fn next(&mut self) -> Option<SubMessage<'a>> {
        if self.remaining.is_empty() {
            return None;
        }

        let mut parse_buf = self.remaining;
        let header = match SubMessageHeader::deser(&mut parse_buf) {
            Ok(header) => header,
            Err(_) => {
                self.remaining = &[];
                return None;
            }
        };

        let size: usize = header.size.safe_cast();
        if size < SubMessageHeader::SERIALIZED_LEN || size > self.remaining.len() {
            self.remaining = &[];
            return None;
        }

        let payload = &self.remaining[SubMessageHeader::SERIALIZED_LEN..size];
        self.remaining = &self.remaining[size..];
        Some(SubMessage {
            kind: header.kind,
            payload,
        })
    }
}

/// Parses and validates the packet header, returning it with an iterator over the datagram's
///  sub-messages
pub fn decode_packet(datagram: &[u8]) -> anyhow::Result<(PacketHeader, SubMessageIter<'_>)> {
    if datagram.is_empty() {
        bail!("empty datagram");
    }
    let mut parse_buf = datagram;
    let header = PacketHeader::deser(&mut parse_buf)?;
    Ok((header, SubMessageIter::new(parse_buf)))
}
