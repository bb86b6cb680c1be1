use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, trace};
use crate::loss_injector::{Direction, LossInjector};

/// This is an abstraction for the non-blocking UDP socket operations CDP needs, introduced to
///  facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;

    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// returns `true` if the socket became readable before the bound passed
    async fn readable_within(&self, bound: Duration) -> bool;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    fn local_addr(&self) -> SocketAddr {
        UdpSocket::local_addr(self)
            .expect("UdpSocket should have an initialized local addr")
    }

    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        UdpSocket::try_send_to(self, buf, to)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::try_recv_from(self, buf)
    }

    async fn readable_within(&self, bound: Duration) -> bool {
        matches!(tokio::time::timeout(bound, self.readable()).await, Ok(Ok(())))
    }
}

/// Socket errors that are part of regular operation on a non-blocking, unconnected UDP socket,
///  e.g. ICMP 'port unreachable' surfacing as a reset on some platforms
pub fn is_benign_socket_error(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::NotConnected | ErrorKind::ConnectionReset)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Datagram { len: usize, from: SocketAddr },
    /// a datagram was read but discarded by loss injection
    Dropped,
    /// a benign error that does not affect further reads
    Skipped,
    /// no more datagrams are waiting
    Drained,
    Failed,
}

#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn DatagramSocket>,
    loss_injector: Arc<dyn LossInjector>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn DatagramSocket>, loss_injector: Arc<dyn LossInjector>) -> SendPipeline {
        SendPipeline { socket, loss_injector, }
    }

    /// Hands a datagram to the socket without blocking. Returns `true` if the socket accepted it.
    ///  Failures are logged rather than returned: CDP's retransmission takes care of lost
    ///  guaranteed datagrams, and others are lossy by contract.
    pub fn transmit(&self, to: SocketAddr, packet_buf: &[u8]) -> bool {
        if self.loss_injector.should_drop(Direction::Outbound) {
            trace!("simulated loss: not sending datagram to {:?}", to);
            return false;
        }

        trace!("UDP socket: sending datagram to {:?}", to);
        match self.socket.try_send_to(packet_buf, to) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("socket is not writable - dropping datagram to {:?}", to);
                false
            }
            Err(e) if is_benign_socket_error(&e) => {
                trace!("not sending datagram to {:?}: {}", to, e);
                false
            }
            Err(e) => {
                error!("error sending UDP datagram to {:?}: {}", to, e);
                false
            }
        }
    }

    pub async fn readable_within(&self, bound: Duration) -> bool {
        self.socket.readable_within(bound).await
    }

    pub fn receive(&self, buf: &mut [u8]) -> ReceiveOutcome {
        match self.socket.try_recv_from(buf) {
            Ok((len, from)) => {
                if self.loss_injector.should_drop(Direction::Inbound) {
                    trace!("simulated loss: dropping datagram from {:?}", from);
                    ReceiveOutcome::Dropped
                }
                else {
                    ReceiveOutcome::Datagram { len, from }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReceiveOutcome::Drained,
            Err(e) if is_benign_socket_error(&e) => {
                trace!("ignoring socket error: {}", e);
                ReceiveOutcome::Skipped
            }
            Err(e) => {
                error!("socket error: {}", e);
                ReceiveOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use rstest::*;
    use crate::loss_injector::{MockLossInjector, NoLoss};

    fn peer() -> SocketAddr {
        SocketAddr::from(([1,2,3,4], 9))
    }

    #[rstest]
    #[case::ok(Ok(3), true)]
    #[case::would_block(Err(ErrorKind::WouldBlock), false)]
    #[case::not_connected(Err(ErrorKind::NotConnected), false)]
    #[case::reset(Err(ErrorKind::ConnectionReset), false)]
    #[case::other(Err(ErrorKind::PermissionDenied), false)]
    fn test_transmit(#[case] socket_result: Result<usize, ErrorKind>, #[case] expected: bool) {
        let mut socket = MockDatagramSocket::new();
        socket.expect_try_send_to()
            .withf(|buf: &[u8], to: &SocketAddr| buf == [1u8,2,3] && *to == peer())
            .times(1)
            .returning(move |_, _| socket_result.map_err(io::Error::from));

        let pipeline = SendPipeline::new(Arc::new(socket), Arc::new(NoLoss));
        assert_eq!(pipeline.transmit(peer(), &[1,2,3]), expected);
    }

    #[test]
    fn test_transmit_with_simulated_loss() {
        let mut socket = MockDatagramSocket::new();
        socket.expect_try_send_to()
            .never();
        let mut loss = MockLossInjector::new();
        loss.expect_should_drop()
            .with(eq(Direction::Outbound))
            .return_const(true);

        let pipeline = SendPipeline::new(Arc::new(socket), Arc::new(loss));
        assert!(!pipeline.transmit(peer(), &[1,2,3]));
    }

    #[rstest]
    #[case::datagram(Ok((5, peer())), false, ReceiveOutcome::Datagram { len: 5, from: peer() })]
    #[case::dropped(Ok((5, peer())), true, ReceiveOutcome::Dropped)]
    #[case::drained(Err(ErrorKind::WouldBlock), false, ReceiveOutcome::Drained)]
    #[case::reset(Err(ErrorKind::ConnectionReset), false, ReceiveOutcome::Skipped)]
    #[case::failed(Err(ErrorKind::PermissionDenied), false, ReceiveOutcome::Failed)]
    fn test_receive(#[case] socket_result: Result<(usize, SocketAddr), ErrorKind>, #[case] drop_inbound: bool, #[case] expected: ReceiveOutcome) {
        let mut socket = MockDatagramSocket::new();
        socket.expect_try_recv_from()
            .times(1)
            .returning(move |_| socket_result.map_err(io::Error::from));
        let mut loss = MockLossInjector::new();
        loss.expect_should_drop()
            .with(eq(Direction::Inbound))
            .return_const(drop_inbound);

        let pipeline = SendPipeline::new(Arc::new(socket), Arc::new(loss));
        let mut buf = [0u8; 16];
        assert_eq!(pipeline.receive(&mut buf), expected);
    }
}
