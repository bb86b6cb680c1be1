//! CDP (Controlled Datagram Protocol) is a message transport on top of UDP for real-time games.
//!  It trades TCP's ordering and congestion control for low latency, offering two delivery
//!  modes per message:
//!
//! * *fire-and-forget*: the message is sent once, immediately. It may be lost or duplicated.
//! * *guaranteed*: the message is retransmitted at a fixed interval until the peer
//!   acknowledges it, for a bounded number of attempts. The sender learns the outcome (delivered
//!   or failed) through its message handler. The receiver suppresses redeliveries for a while.
//!
//! ## Design goals
//!
//! * peer-to-peer: a single UDP socket per node talks to all peers, there is no handshake and
//!    no notion of a connection
//! * no fragmentation: every message fits into a single datagram
//! * small guaranteed messages to the same peer are coalesced into a single datagram if they
//!    are sent within one send interval
//! * flow control is a simple cap on the number of unacknowledged datagrams: when the cap is
//!    reached, senders flush everything and wait (with a time bound) for a free slot
//! * the protocol is driven by its owner: `update_receive` and `update_send_queue` are called
//!    once per game tick with the elapsed time, and the endpoint spawns no tasks of its own
//!
//! There is no encryption or authentication, no congestion control beyond fixed retry counts,
//!  and no ordering guarantee across datagrams.
//!
//! ## Datagram format
//!
//! All numbers are in network byte order (BE).
//!
//! ```ascii
//! 0: signature (4 bytes) - ASCII "EQDP"
//! 4: protocol version (u8) - 9
//! 5: flags (u8):
//!    * bit 0: guaranteed - the receiver must acknowledge
//!    * bit 1: immediate - sent without waiting for the send interval (informational)
//!    * bit 2: is-response
//!    * bits 3-7: unused, should be 0, ignored by receivers
//! 6: message id (i16) - cyclic in [0, 32760), or -1 for datagrams carrying only
//!     acknowledgements
//! 8: one or more sub-messages, back to back until the end of the datagram
//! ```
//!
//! Sub-message:
//!
//! ```ascii
//! 0: kind (u16) - 0xda1a for Data, 0x51a1 for Status
//! 2: size (u16) - including this 4 byte header
//! 4: payload (size - 4 bytes)
//! ```
//!
//! Receivers stop parsing a datagram at the first sub-message with a size smaller than its
//!  header or reaching beyond the end of the datagram. Sub-messages of unknown kind are skipped.
//!
//! Status payload, acknowledging a guaranteed datagram:
//!
//! ```ascii
//! 0: message id (i16) - the id of the acknowledged datagram
//! 2: status (i16) - 0 for success
//! ```
//!
//! A receiver acknowledges every Data sub-message of a guaranteed datagram, and it acknowledges
//!  redeliveries again without passing them to the application.
//!
//! ## Message ids and deduplication
//!
//! Each endpoint assigns ids to its outbound datagrams from a single cyclic counter. Messages
//!  that were coalesced into a datagram share its id. Receivers remember (sender, id) pairs for a
//!  retention period, and they forget all ids of a sender when that sender's counter is about
//!  to wrap around.

pub mod backpressure;
pub mod buffers;
pub mod config;
pub mod dedup_ledger;
pub mod end_point;
pub mod loss_injector;
pub mod message_handler;
pub mod message_id;
pub mod packet_header;
pub mod safe_converter;
pub mod send_pipeline;
pub mod send_scheduler;
pub mod sub_message;

#[cfg(test)]
mod test_util;
