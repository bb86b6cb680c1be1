#[cfg(test)] use mockall::automock;
use std::sync::Arc;
use rand::Rng;
use tracing::warn;
use crate::config::CdpConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Decides whether a datagram is dropped to simulate a lossy network
#[cfg_attr(test, automock)]
pub trait LossInjector: Send + Sync + 'static {
    fn should_drop(&self, direction: Direction) -> bool;
}

pub struct NoLoss;

impl LossInjector for NoLoss {
    fn should_drop(&self, _direction: Direction) -> bool {
        false
    }
}

/// Drops each datagram independently with a fixed probability, in both directions
pub struct RandomLoss {
    probability: f64,
}

impl RandomLoss {
    pub fn new(probability: f64) -> RandomLoss {
        RandomLoss { probability }
    }
}

impl LossInjector for RandomLoss {
    fn should_drop(&self, _direction: Direction) -> bool {
        rand::thread_rng().gen_bool(self.probability)
    }
}

pub fn loss_injector_for(config: &CdpConfig) -> Arc<dyn LossInjector> {
    if config.loss_probability > 0.0 {
        warn!("simulating packet loss with probability {} - this is for debugging purposes and must not be used in production", config.loss_probability);
        Arc::new(RandomLoss::new(config.loss_probability))
    }
    else {
        Arc::new(NoLoss)
    }
}
