//! In-memory stand-ins for the network and the application callback, for tests that exercise
//!  complete endpoints

use std::collections::VecDeque;
use std::io;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use crate::message_handler::{MessageHandler, ReceivedKind};
use crate::message_id::MessageId;
use crate::send_pipeline::DatagramSocket;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct TestNetworkInner {
    queues: FxHashMap<SocketAddr, VecDeque<Datagram>>,
    sent: Vec<Datagram>,
}

/// Delivers datagrams between [TestSocket]s without loss or reordering, and keeps a log of
///  everything that was sent
#[derive(Clone, Default)]
pub struct TestNetwork {
    inner: Arc<Mutex<TestNetworkInner>>,
}

impl TestNetwork {
    pub fn socket(&self, addr: SocketAddr) -> Arc<TestSocket> {
        self.inner.lock().unwrap()
            .queues.entry(addr).or_default();
        Arc::new(TestSocket {
            addr,
            network: self.clone(),
        })
    }

    /// puts a raw datagram into the receive queue of `to` without logging it as sent
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        self.inner.lock().unwrap()
            .queues.entry(to).or_default()
            .push_back(Datagram { from, to, bytes: bytes.to_vec() });
    }

    pub fn sent_from(&self, from: SocketAddr) -> Vec<Datagram> {
        self.inner.lock().unwrap()
            .sent.iter()
            .filter(|d| d.from == from)
            .cloned()
            .collect()
    }

    pub fn num_queued(&self, to: SocketAddr) -> usize {
        self.inner.lock().unwrap()
            .queues.get(&to)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

pub struct TestSocket {
    addr: SocketAddr,
    network: TestNetwork,
}

#[async_trait]
impl DatagramSocket for TestSocket {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn try_send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        let datagram = Datagram { from: self.addr, to, bytes: buf.to_vec() };
        let mut inner = self.network.inner.lock().unwrap();
        inner.sent.push(datagram.clone());
        if let Some(queue) = inner.queues.get_mut(&to) {
            queue.push_back(datagram);
        }
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inner = self.network.inner.lock().unwrap();
        match inner.queues.get_mut(&self.addr).and_then(|q| q.pop_front()) {
            Some(datagram) => {
                let len = datagram.bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram.bytes[..len]);
                Ok((len, datagram.from))
            }
            None => Err(io::Error::from(ErrorKind::WouldBlock)),
        }
    }

    async fn readable_within(&self, bound: Duration) -> bool {
        if self.network.num_queued(self.addr) > 0 {
            return true;
        }
        tokio::time::sleep(bound).await;
        self.network.num_queued(self.addr) > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
    pub message_id: MessageId,
    pub kind: ReceivedKind,
}

#[derive(Default)]
pub struct RecordingHandler {
    pub events: Vec<ReceivedEvent>,
}

impl RecordingHandler {
    pub fn take(&mut self) -> Vec<ReceivedEvent> {
        std::mem::take(&mut self.events)
    }
}

impl MessageHandler for RecordingHandler {
    fn on_message(&mut self, payload: &[u8], from: SocketAddr, message_id: MessageId, kind: ReceivedKind) {
        self.events.push(ReceivedEvent {
            payload: payload.to_vec(),
            from,
            message_id,
            kind,
        });
    }
}
