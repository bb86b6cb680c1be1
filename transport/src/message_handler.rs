#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use crate::message_id::MessageId;

/// Outcome of a guaranteed send as reported back to the sender
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// the peer acknowledged the datagram
    Delivered,
    /// all transmission attempts and the grace period passed without acknowledgement, or the
    ///  peer reported failure
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceivedKind {
    Data,
    Response,
    Status(DeliveryStatus),
}

/// Application callback for everything an endpoint's update operations produce: incoming
///  payload, and delivery status for the endpoint's own guaranteed datagrams. Status events
///  carry an empty payload.
///
/// The callback is invoked synchronously from inside the update call. It receives no reference
///  to the endpoint, and the endpoint holds no locks while calling it.
#[cfg_attr(test, automock)]
pub trait MessageHandler: Send {
    fn on_message(&mut self, payload: &[u8], from: SocketAddr, message_id: MessageId, kind: ReceivedKind);
}
