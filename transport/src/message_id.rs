use std::fmt::{Debug, Display, Formatter};

/// Identifies a datagram between a pair of peers. Ids are assigned from a cyclic counter in
///  `[0, MessageId::MAX_MESSAGE_ID)`; datagrams that carry only acknowledgements have
///  [MessageId::NONE].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct MessageId(i16);

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.0)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl MessageId {
    pub const MAX_MESSAGE_ID: i16 = 32760;
    pub const NONE: MessageId = MessageId(-1);

    pub fn from_raw(value: i16) -> MessageId {
        MessageId(value)
    }

    pub fn to_raw(&self) -> i16 {
        self.0
    }

    /// Ids from the cyclic counter are tracked by the receiver's dedup ledger, [MessageId::NONE]
    ///  and other negative values are not
    pub fn is_tracked(&self) -> bool {
        self.0 >= 0
    }

    /// Ids at the end of the counter range announce that the sender is about to wrap around,
    ///  so receivers stop remembering the previous cycle's ids
    pub fn is_near_wraparound(&self) -> bool {
        self.0 >= Self::MAX_MESSAGE_ID - 1
    }
}

/// Cyclic id source for all outbound datagrams of an endpoint
#[derive(Default)]
pub struct MessageIdGenerator {
    next: i16,
}

impl MessageIdGenerator {
    pub fn next_id(&mut self) -> MessageId {
        if self.next >= MessageId::MAX_MESSAGE_ID {
            self.next = 0;
        }
        let result = MessageId(self.next);
        self.next += 1;
        result
    }
}
