use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tracing::{debug, info, span, trace, warn, Level};
use uuid::Uuid;
use crate::backpressure::{BackpressureGovernor, PoolCapacity};
use crate::buffers::outbound_buffer::OutboundBuffer;
use crate::buffers::send_pool::OutboundPool;
use crate::config::CdpConfig;
use crate::dedup_ledger::DedupLedger;
use crate::loss_injector::{loss_injector_for, LossInjector};
use crate::message_handler::{DeliveryStatus, MessageHandler, ReceivedKind};
use crate::message_id::{MessageId, MessageIdGenerator};
use crate::packet_header::{PacketHeader, SendOptions};
use crate::send_pipeline::{DatagramSocket, ReceiveOutcome, SendPipeline};
use crate::send_scheduler::SendScheduler;
use crate::sub_message::{decode_packet, StatusPayload, SubMessageHeader, SubMessageKind};

/// Send failures that callers may want to handle specifically. They are returned wrapped in
///  `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    Closed,
    EmptyMessage,
    MessageTooLarge { len: usize, max_len: usize },
    /// the outbound pool stayed at capacity for the entire backpressure wait
    SendQueueFull,
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed => write!(f, "endpoint is closed"),
            SendError::EmptyMessage => write!(f, "empty messages can not be sent"),
            SendError::MessageTooLarge { len, max_len } => write!(f, "message of {} bytes exceeds the maximum of {} bytes for a single datagram", len, max_len),
            SendError::SendQueueFull => write!(f, "outbound pool is at capacity"),
        }
    }
}

impl std::error::Error for SendError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendReceipt {
    /// fire-and-forget: the datagram was handed to the socket, no status will follow
    Immediate,
    /// guaranteed: a status event for this id will be reported to the handler. Messages that
    ///  were coalesced into the same datagram share the id.
    Pending(MessageId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CdpStats {
    pub num_pending_datagrams: usize,
    pub pending_bytes: usize,
    pub num_remembered_ids: usize,
}

struct CdpState {
    closed: bool,
    pool: OutboundPool,
    ledger: DedupLedger,
    message_ids: MessageIdGenerator,
}

/// A socket bound to an unspecified address sees its own datagrams coming from a concrete
///  address, typically loopback
fn is_own_address(self_addr: SocketAddr, from: SocketAddr) -> bool {
    if from.port() != self_addr.port() {
        return false;
    }
    from.ip() == self_addr.ip()
        || (self_addr.ip().is_unspecified() && from.ip().is_loopback())
}

/// CdpEndPoint is the place where all parts of the protocol come together: it owns the UDP
///  socket and the outbound pool, and has an API for application code to send messages.
///
/// The owner drives the protocol by calling [CdpEndPoint::update_receive] and
///  [CdpEndPoint::update_send_queue] periodically from a single task, passing the time
///  elapsed since the previous call. `send` may be called concurrently from other tasks.
///
/// All mutable state is behind a single mutex that is held only for short, non-blocking
///  sections - never across an `.await` and never while calling the [MessageHandler].
pub struct CdpEndPoint {
    config: Arc<CdpConfig>,
    self_addr: SocketAddr,
    pipeline: SendPipeline,
    scheduler: SendScheduler,
    governor: BackpressureGovernor,
    state: Mutex<CdpState>,
}

impl CdpEndPoint {
    pub async fn bind(config: Arc<CdpConfig>) -> anyhow::Result<CdpEndPoint> {
        config.validate()?;

        let socket = UdpSocket::bind(config.self_addr).await?;
        // tokio's try_send_to fails with WouldBlock until the reactor has seen the socket writable
        socket.writable().await?;
        info!("bound CDP socket to {:?}", socket.local_addr()?);

        let loss_injector = loss_injector_for(&config);
        Self::with_socket(config, Arc::new(socket), loss_injector)
    }

    pub fn with_socket(config: Arc<CdpConfig>, socket: Arc<dyn DatagramSocket>, loss_injector: Arc<dyn LossInjector>) -> anyhow::Result<CdpEndPoint> {
        config.validate()?;
        let capacity = PoolCapacity::new(config.max_queue_buffers)?;

        Ok(CdpEndPoint {
            self_addr: socket.local_addr(),
            pipeline: SendPipeline::new(socket, loss_injector),
            scheduler: SendScheduler::new(config.clone()),
            governor: BackpressureGovernor::new(capacity),
            state: Mutex::new(CdpState {
                closed: false,
                pool: OutboundPool::new(config.clone(), capacity),
                ledger: DedupLedger::new(config.receive_dedup_timeout),
                message_ids: MessageIdGenerator::default(),
            }),
            config,
        })
    }

    pub fn self_addr(&self) -> SocketAddr {
        self.self_addr
    }

    fn lock_state(&self) -> MutexGuard<'_, CdpState> {
        self.state.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Discards all pending datagrams and remembered ids. Subsequent sends fail, and the
    ///  update operations do nothing. Closing an endpoint more than once has no effect.
    pub fn close(&self) {
        let num_discarded = {
            let mut state = self.lock_state();
            if state.closed {
                debug!("endpoint is already closed");
                return;
            }
            state.closed = true;
            state.ledger.clear();
            state.pool.clear()
        };
        self.governor.release_all_waiting();
        info!("closed CDP endpoint {:?}, discarding {} pending datagrams", self.self_addr(), num_discarded);
    }

    pub fn stats(&self) -> CdpStats {
        let state = self.lock_state();
        CdpStats {
            num_pending_datagrams: state.pool.len(),
            pending_bytes: state.pool.iter().map(|b| b.len()).sum(),
            num_remembered_ids: state.ledger.len(),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!("CDP endpoint {:?}: {} pending datagrams ({} bytes), {} remembered received ids",
            self.self_addr(), stats.num_pending_datagrams, stats.pending_bytes, stats.num_remembered_ids);
    }

    /// Sends a message to a peer, either directly (fire-and-forget) or through the outbound
    ///  pool (guaranteed).
    ///
    /// Guaranteed sends wait for a free slot if the pool is at capacity, flushing all pending
    ///  datagrams first. If no slot becomes available within one send interval per pooled
    ///  datagram, this fails with [SendError::SendQueueFull].
    pub async fn send(&self, message: &[u8], to: SocketAddr, options: SendOptions) -> anyhow::Result<SendReceipt> {
        if message.is_empty() {
            debug!("rejecting empty message to {:?}", to);
            return Err(SendError::EmptyMessage.into());
        }
        let max_len = self.config.max_message_len();
        if message.len() > max_len {
            debug!("message to {:?} has a maximum length of {} to fit a single datagram, was {}", to, max_len, message.len());
            return Err(SendError::MessageTooLarge { len: message.len(), max_len }.into());
        }

        if options.is_guaranteed() {
            self.send_guaranteed(message, to, options).await
        }
        else {
            self.send_fire_and_forget(message, to, options)
        }
    }

    fn send_fire_and_forget(&self, message: &[u8], to: SocketAddr, options: SendOptions) -> anyhow::Result<SendReceipt> {
        let message_id = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(SendError::Closed.into());
            }
            state.message_ids.next_id()
        };

        let mut buffer = OutboundBuffer::new(to, options, message_id, self.config.max_datagram_payload);
        buffer.append_data(message);
        trace!("sending fire-and-forget datagram {:?} to {:?}", message_id, to);
        self.pipeline.transmit(to, buffer.as_bytes());
        Ok(SendReceipt::Immediate)
    }

    async fn send_guaranteed(&self, message: &[u8], to: SocketAddr, options: SendOptions) -> anyhow::Result<SendReceipt> {
        if let Some(message_id) = self.try_enqueue(message, to, options)? {
            return Ok(SendReceipt::Pending(message_id));
        }

        let bound = self.config.backpressure_wait_bound(self.lock_state().pool.len());
        warn!("outbound pool is at capacity of {} datagrams - flushing and waiting up to {:?} for a free slot", self.governor.capacity().get(), bound);
        self.flush_all_then_wait(bound).await;

        match self.try_enqueue(message, to, options)? {
            Some(message_id) => Ok(SendReceipt::Pending(message_id)),
            None => {
                warn!("no free slot in outbound pool after {:?} - rejecting message to {:?}", bound, to);
                Err(SendError::SendQueueFull.into())
            }
        }
    }

    /// Returns `None` if the message needs a new pool entry but the pool is at capacity
    fn try_enqueue(&self, message: &[u8], to: SocketAddr, options: SendOptions) -> anyhow::Result<Option<MessageId>> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.closed {
            return Err(SendError::Closed.into());
        }

        if let Some(message_id) = state.pool.append_to_reusable(to, options, message) {
            return Ok(Some(message_id));
        }
        if state.pool.is_at_capacity() {
            return Ok(None);
        }

        let message_id = state.message_ids.next_id();
        state.pool.enqueue(to, options, message_id, message);
        Ok(Some(message_id))
    }

    /// Makes all pooled datagrams due on the next send tick, then waits for up to `bound`
    ///  until the pool has a free slot. Returns `true` if it has.
    pub async fn flush_all_then_wait(&self, bound: Duration) -> bool {
        self.lock_state().pool.expire_all_send_timeouts();
        self.governor.wait_for_slot(bound, || !self.lock_state().pool.is_at_capacity()).await
    }

    /// Acknowledges a received datagram (or reports failure for it) to its sender. Status
    ///  datagrams are themselves fire-and-forget.
    pub fn send_message_status(&self, to: SocketAddr, message_id: MessageId, status: DeliveryStatus) {
        let mut buf = BytesMut::with_capacity(PacketHeader::SERIALIZED_LEN + SubMessageHeader::SERIALIZED_LEN + StatusPayload::SERIALIZED_LEN);
        PacketHeader::for_status().ser(&mut buf);
        StatusPayload::new(message_id, status).ser_sub_message(&mut buf);

        trace!("sending status {:?} for {:?} to {:?}", status, message_id, to);
        self.pipeline.transmit(to, &buf);
    }

    /// Retires a pooled datagram, typically because it was acknowledged. Returns `false` if
    ///  there is no pooled datagram with this id (anymore).
    pub fn remove_message_from_send_pool(&self, message_id: MessageId) -> bool {
        let removed = {
            let mut state = self.lock_state();
            let was_at_capacity = state.pool.is_at_capacity();
            state.pool.remove_by_id(message_id)
                .map(|_| was_at_capacity)
        };

        match removed {
            Some(was_at_capacity) => {
                trace!("removed {:?} from outbound pool", message_id);
                if was_at_capacity {
                    self.governor.signal_slot_freed();
                }
                true
            }
            None => {
                trace!("{:?} is not in the outbound pool - already acknowledged or expired", message_id);
                false
            }
        }
    }

    pub fn has_any_message_with_id(&self, from: SocketAddr, message_id: MessageId) -> bool {
        self.lock_state().ledger.has_any_message_with_id(from, message_id)
    }

    /// Transmits pooled datagrams that are due, and reports guaranteed datagrams that were
    ///  never acknowledged to the handler as [DeliveryStatus::Failed].
    pub fn update_send_queue(&self, dt: Duration, handler: &mut dyn MessageHandler) {
        let outcome = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            self.scheduler.tick(&mut state.pool, dt, &self.pipeline)
        };

        if outcome.was_at_capacity {
            for _ in 0..outcome.num_freed {
                self.governor.signal_slot_freed();
            }
        }

        for expired in outcome.expired {
            warn!("datagram {:?} to {:?} was not acknowledged after {} attempts - giving up", expired.message_id, expired.destination, self.config.max_send_attempts);
            handler.on_message(&[], expired.destination, expired.message_id, ReceivedKind::Status(DeliveryStatus::Failed));
        }
    }

    /// Waits (bounded) for incoming datagrams and dispatches everything that arrived, then ages
    ///  the remembered ids by `dt`.
    pub async fn update_receive(&self, dt: Duration, handler: &mut dyn MessageHandler) {
        if self.is_closed() {
            return;
        }

        if self.pipeline.readable_within(self.config.receive_poll_bound).await {
            self.drain_socket(handler);
        }

        self.lock_state().ledger.age(dt);
    }

    fn drain_socket(&self, handler: &mut dyn MessageHandler) {
        let mut buf = vec![0u8; self.config.max_datagram_payload];

        for _ in 0..self.config.max_datagrams_per_update {
            match self.pipeline.receive(&mut buf) {
                ReceiveOutcome::Datagram { len, from } => {
                    let correlation_id = Uuid::new_v4();
                    let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
                    let _entered = span.enter();

                    self.on_datagram(from, &buf[..len], handler);
                }
                ReceiveOutcome::Dropped | ReceiveOutcome::Skipped | ReceiveOutcome::Failed => {}
                ReceiveOutcome::Drained => return,
            }
        }
        debug!("read {} datagrams in a single update, leaving the rest for the next one", self.config.max_datagrams_per_update);
    }

    fn on_datagram(&self, from: SocketAddr, datagram: &[u8], handler: &mut dyn MessageHandler) {
        trace!("received datagram from {:?}: {:?}", from, datagram);

        if datagram.is_empty() {
            debug!("empty datagram from {:?} - dropping", from);
            return;
        }
        if is_own_address(self.self_addr, from) {
            debug!("datagram from own address - dropping");
            return;
        }

        let (header, sub_messages) = match decode_packet(datagram) {
            Ok(x) => x,
            Err(e) => {
                debug!("dropping datagram from {:?}: {}", from, e);
                return;
            }
        };

        if self.check_and_record(from, header.message_id) {
            debug!("duplicate datagram {:?} from {:?} - dropping", header.message_id, from);
            if header.is_guaranteed() {
                self.send_message_status(from, header.message_id, DeliveryStatus::Delivered);
            }
            return;
        }

        for sub_message in sub_messages {
            match sub_message.kind {
                SubMessageKind::Data => {
                    if header.is_guaranteed() {
                        self.send_message_status(from, header.message_id, DeliveryStatus::Delivered);
                    }
                    let kind = if header.is_response() { ReceivedKind::Response } else { ReceivedKind::Data };
                    handler.on_message(sub_message.payload, from, header.message_id, kind);
                }
                SubMessageKind::Status => {
                    self.on_status(from, sub_message.payload, handler);
                }
                SubMessageKind::Unknown(raw) => {
                    debug!("skipping sub-message of unknown kind {:#06x} from {:?}", raw, from);
                }
            }
        }
    }

    /// returns `true` if the datagram was seen before
    fn check_and_record(&self, from: SocketAddr, message_id: MessageId) -> bool {
        if !message_id.is_tracked() {
            return false;
        }

        let mut state = self.lock_state();
        if state.ledger.has_any_message_with_id(from, message_id) {
            return true;
        }
        if message_id.is_near_wraparound() {
            debug!("{:?} is about to wrap around its message ids - forgetting its previous ids", from);
            state.ledger.forget_peer(from);
        }
        state.ledger.record(from, message_id);
        false
    }

    fn on_status(&self, from: SocketAddr, mut payload: &[u8], handler: &mut dyn MessageHandler) {
        let status = match StatusPayload::deser(&mut payload) {
            Ok(status) => status,
            Err(e) => {
                debug!("malformed status sub-message from {:?}: {}", from, e);
                return;
            }
        };

        trace!("status {:?} for {:?} from {:?}", status.delivery_status(), status.message_id, from);
        handler.on_message(&[], from, status.message_id, ReceivedKind::Status(status.delivery_status()));
        self.remove_message_from_send_pool(status.message_id);
    }
}
