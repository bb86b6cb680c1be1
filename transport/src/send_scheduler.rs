use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use crate::buffers::send_pool::OutboundPool;
use crate::config::CdpConfig;
use crate::message_id::MessageId;
use crate::send_pipeline::SendPipeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiredMessage {
    pub destination: SocketAddr,
    pub message_id: MessageId,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// guaranteed messages that exhausted their retry budget and grace period
    pub expired: Vec<ExpiredMessage>,
    pub num_transmitted: usize,
    pub num_freed: usize,
    /// the pool was at capacity before the tick, so senders may be waiting for a slot
    pub was_at_capacity: bool,
}

/// Drives retransmission of pooled buffers, one tick per call with the elapsed time since the
///  previous tick:
///
/// * a buffer is transmitted when its send interval elapsed, at most `max_send_attempts` times
/// * after the last attempt, a buffer stays in the pool for the grace period so a late
///    acknowledgement still retires it normally
/// * after the grace period, the buffer is dropped and reported as expired
pub struct SendScheduler {
    config: Arc<CdpConfig>,
}

impl SendScheduler {
    pub fn new(config: Arc<CdpConfig>) -> SendScheduler {
        SendScheduler { config }
    }

    pub fn tick(&self, pool: &mut OutboundPool, dt: Duration, pipeline: &SendPipeline) -> TickOutcome {
        let mut outcome = TickOutcome {
            was_at_capacity: pool.is_at_capacity(),
            ..TickOutcome::default()
        };
        let len_before = pool.len();

        pool.retain_mut(|buffer| {
            if buffer.send_times >= self.config.max_send_attempts {
                buffer.remove_timeout += dt;
                if buffer.remove_timeout >= self.config.unconfirmed_remove_timeout {
                    outcome.expired.push(ExpiredMessage {
                        destination: buffer.destination(),
                        message_id: buffer.message_id(),
                    });
                    return false;
                }
                return true;
            }

            buffer.sent_timeout += dt;
            if buffer.sent_timeout >= self.config.send_timeout {
                buffer.send_times += 1;
                buffer.sent_timeout = Duration::ZERO;
                buffer.last_sent_at = Some(Instant::now());
                trace!("transmitting {:?} to {:?}, attempt #{}", buffer.message_id(), buffer.destination(), buffer.send_times);
                pipeline.transmit(buffer.destination(), buffer.as_bytes());
                outcome.num_transmitted += 1;

                if !buffer.options().is_guaranteed() {
                    return false;
                }
            }
            true
        });

        outcome.num_freed = len_before - pool.len();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{always, eq};
    use rstest::*;
    use crate::backpressure::PoolCapacity;
    use crate::loss_injector::NoLoss;
    use crate::packet_header::SendOptions;
    use crate::send_pipeline::MockDatagramSocket;

    fn peer() -> SocketAddr {
        SocketAddr::from(([1,2,3,4], 9))
    }

    fn config() -> Arc<CdpConfig> {
        Arc::new(CdpConfig::new(SocketAddr::from(([127,0,0,1], 0))))
    }

    fn pipeline(expected_transmissions: usize) -> SendPipeline {
        let mut socket = MockDatagramSocket::new();
        socket.expect_try_send_to()
            .with(always(), eq(peer()))
            .times(expected_transmissions)
            .returning(|buf, _| Ok(buf.len()));
        SendPipeline::new(Arc::new(socket), Arc::new(NoLoss))
    }

    fn pool_with_message(config: &Arc<CdpConfig>) -> OutboundPool {
        let mut pool = OutboundPool::new(config.clone(), PoolCapacity::new(config.max_queue_buffers).unwrap());
        pool.enqueue(peer(), SendOptions::guaranteed(), MessageId::from_raw(7), b"hello");
        pool
    }

    #[rstest]
    #[case::not_yet(9, 0)]
    #[case::exactly_due(10, 1)]
    #[case::overdue(25, 1)]
    fn test_first_transmission(#[case] dt_millis: u64, #[case] expected_transmissions: usize) {
        let config = config();
        let mut pool = pool_with_message(&config);
        let pipeline = pipeline(expected_transmissions);

        let outcome = SendScheduler::new(config).tick(&mut pool, Duration::from_millis(dt_millis), &pipeline);
        assert_eq!(outcome.num_transmitted, expected_transmissions);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_and_grace_period() {
        let config = config();
        let mut pool = pool_with_message(&config);
        let pipeline = pipeline(5);
        let scheduler = SendScheduler::new(config);

        let mut transmission_ticks = vec![];
        for tick in 1..=104 {
            let outcome = scheduler.tick(&mut pool, Duration::from_millis(10), &pipeline);
            if outcome.num_transmitted > 0 {
                transmission_ticks.push(tick);
            }
            assert!(outcome.expired.is_empty());
        }
        assert_eq!(transmission_ticks, vec![1, 2, 3, 4, 5]);
        assert_eq!(pool.len(), 1);

        let outcome = scheduler.tick(&mut pool, Duration::from_millis(10), &pipeline);
        assert_eq!(outcome.expired, vec![ExpiredMessage { destination: peer(), message_id: MessageId::from_raw(7) }]);
        assert_eq!(outcome.num_freed, 1);
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expedited_buffer_goes_out_on_next_tick() {
        let config = config();
        let mut pool = OutboundPool::new(config.clone(), PoolCapacity::new(2).unwrap());
        pool.enqueue(peer(), SendOptions::guaranteed().immediate(), MessageId::from_raw(1), b"now");
        let pipeline = pipeline(1);

        let outcome = SendScheduler::new(config).tick(&mut pool, Duration::from_millis(1), &pipeline);
        assert_eq!(outcome.num_transmitted, 1);
        assert!(pool.iter().next().unwrap().last_sent_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_was_at_capacity() {
        let config = config();
        let mut pool = OutboundPool::new(config.clone(), PoolCapacity::new(1).unwrap());
        pool.enqueue(peer(), SendOptions::guaranteed(), MessageId::from_raw(1), b"x");
        let pipeline = pipeline(0);

        let outcome = SendScheduler::new(config).tick(&mut pool, Duration::ZERO, &pipeline);
        assert!(outcome.was_at_capacity);
        assert_eq!(outcome.num_freed, 0);
    }
}
