use std::time::Duration;
use anyhow::bail;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCapacity(usize);

impl PoolCapacity {
    pub fn new(max_buffers: usize) -> anyhow::Result<PoolCapacity> {
        if max_buffers == 0 {
            bail!("pool capacity must be positive");
        }
        Ok(PoolCapacity(max_buffers))
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn is_reached_by(&self, len: usize) -> bool {
        len >= self.0
    }
}

/// Lets senders wait (with a time bound) for a slot in a full outbound pool. Whoever frees a
///  slot signals the governor, waking one waiting sender.
pub struct BackpressureGovernor {
    capacity: PoolCapacity,
    slot_freed: Notify,
}

impl BackpressureGovernor {
    pub fn new(capacity: PoolCapacity) -> BackpressureGovernor {
        BackpressureGovernor {
            capacity,
            slot_freed: Notify::new(),
        }
    }

    pub fn capacity(&self) -> PoolCapacity {
        self.capacity
    }

    pub fn signal_slot_freed(&self) {
        self.slot_freed.notify_one();
    }

    /// wakes all waiting senders, e.g. when the pool is discarded
    pub fn release_all_waiting(&self) {
        self.slot_freed.notify_waiters();
    }

    /// Waits until `has_room` returns `true` or the bound passes, returning the last result of
    ///  `has_room`. Wake-ups are hints only, `has_room` is the source of truth.
    pub async fn wait_for_slot(&self, bound: Duration, has_room: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + bound;
        loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if has_room() {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                trace!("no slot was freed within {:?}", bound);
                return has_room();
            }
        }
    }
}
