//! Lossy air interface between the two peers

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Counters of one direction
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelStats {
    pub delivered_pdus: u64,
    pub dropped_pdus: u64,
}

/// Drops each PDU independently with a fixed probability
pub struct LossyChannel {
    rng: StdRng,
    loss_rate: f64,
    stats: ChannelStats,
}

impl LossyChannel {
    pub fn new(loss_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            stats: ChannelStats::default(),
        }
    }

    /// Whether the next PDU survives the channel
    pub fn pass(&mut self) -> bool {
        let lost = self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate);
        if lost {
            self.stats.dropped_pdus += 1;
        } else {
            self.stats.delivered_pdus += 1;
        }
        !lost
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossless_and_blocking_channels() {
        let mut perfect = LossyChannel::new(0.0, Some(1));
        assert!((0..100).all(|_| perfect.pass()));
        assert_eq!(perfect.stats().delivered_pdus, 100);

        let mut dead = LossyChannel::new(1.0, Some(1));
        assert!((0..100).all(|_| !dead.pass()));
        assert_eq!(dead.stats().dropped_pdus, 100);
    }

    #[test]
    fn test_seeded_channel_is_reproducible() {
        let mut a = LossyChannel::new(0.3, Some(42));
        let mut b = LossyChannel::new(0.3, Some(42));
        let run_a: Vec<bool> = (0..200).map(|_| a.pass()).collect();
        let run_b: Vec<bool> = (0..200).map(|_| b.pass()).collect();
        assert_eq!(run_a, run_b);
        assert!(a.stats().dropped_pdus > 0);
        assert!(a.stats().delivered_pdus > 0);
    }
}
