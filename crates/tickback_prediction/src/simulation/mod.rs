//! # Simulation
//!
//! Deterministic stand-ins for the collaborators the engine does not own,
//! used by tests, benches and the soak binary.
//!
//! ## Contents
//!
//! - [`PointMassWorld`]: reference fixed-step integrator
//! - [`OffsetMover`]: reference input component
//! - [`SimulatedLink`]: tick-based link with latency, jitter, loss and
//!   duplication
//! - [`SimulatedNetwork`]: one authority and many clients joined by
//!   simulated links, implementing the transport hooks

mod mover;
mod network;
mod world;

pub use mover::{OffsetCommand, OffsetMover};
pub use network::{SimulatedClientLink, SimulatedNetwork, SimulatedServerLink};
pub use world::PointMassWorld;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link conditions measured in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkConditions {
    /// Base one-way latency.
    pub latency_ticks: u32,
    /// Extra random latency in `0..=jitter_ticks`. Causes reordering.
    pub jitter_ticks: u32,
    /// Packet loss percentage (0-100).
    pub loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
}

impl NetworkConditions {
    /// Instant, lossless delivery.
    pub const PERFECT: Self = Self {
        latency_ticks: 0,
        jitter_ticks: 0,
        loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Fixed latency, no jitter (fiber, about 50 ms at 60 Hz).
    pub const GOOD: Self = Self {
        latency_ticks: 3,
        jitter_ticks: 0,
        loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Cable: some jitter, rare loss.
    pub const AVERAGE: Self = Self {
        latency_ticks: 3,
        jitter_ticks: 2,
        loss_percent: 1,
        duplicate_percent: 1,
    };

    /// Mobile/wifi.
    pub const POOR: Self = Self {
        latency_ticks: 6,
        jitter_ticks: 4,
        loss_percent: 5,
        duplicate_percent: 2,
    };
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::AVERAGE
    }
}

/// Delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages handed to the link.
    pub sent: u64,
    /// Messages dropped.
    pub dropped: u64,
    /// Extra copies injected.
    pub duplicated: u64,
    /// Messages delivered (copies included).
    pub delivered: u64,
}

/// One-directional unreliable link advanced one tick at a time.
#[derive(Debug)]
pub struct SimulatedLink<T> {
    conditions: NetworkConditions,
    rng: StdRng,
    now: u64,
    sequence: u64,
    in_flight: Vec<(u64, u64, T)>,
    stats: LinkStats,
}

impl<T: Clone> SimulatedLink<T> {
    /// Creates a link with a fixed seed.
    #[must_use]
    pub fn new(conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            now: 0,
            sequence: 0,
            in_flight: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    /// Queues `message` for delivery.
    pub fn send(&mut self, message: T) {
        self.stats.sent += 1;
        if self.roll(self.conditions.loss_percent) {
            self.stats.dropped += 1;
            return;
        }
        if self.roll(self.conditions.duplicate_percent) {
            self.stats.duplicated += 1;
            self.enqueue(message.clone());
        }
        self.enqueue(message);
    }

    /// Advances one tick and returns everything that arrived, in arrival order.
    pub fn advance(&mut self) -> Vec<T> {
        self.now += 1;
        let now = self.now;
        let mut arrived: Vec<(u64, u64, T)> = Vec::new();
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index].0 <= now {
                arrived.push(self.in_flight.swap_remove(index));
            } else {
                index += 1;
            }
        }
        arrived.sort_by_key(|(at, seq, _)| (*at, *seq));
        self.stats.delivered += arrived.len() as u64;
        arrived.into_iter().map(|(_, _, message)| message).collect()
    }

    /// Messages still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn enqueue(&mut self, message: T) {
        let jitter = if self.conditions.jitter_ticks > 0 {
            self.rng.gen_range(0..=self.conditions.jitter_ticks)
        } else {
            0
        };
        // Delivered no earlier than the next advance.
        let at = self.now + u64::from(self.conditions.latency_ticks + jitter).max(1);
        self.in_flight.push((at, self.sequence, message));
        self.sequence += 1;
    }

    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0..100u8) < percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_latency_preserves_order() {
        let mut link = SimulatedLink::new(NetworkConditions::GOOD, 1);
        let mut received = Vec::new();
        for i in 0..10u32 {
            link.send(i);
            received.extend(link.advance());
        }
        for _ in 0..5 {
            received.extend(link.advance());
        }
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_latency_delays_delivery() {
        let mut link = SimulatedLink::new(NetworkConditions::GOOD, 1);
        link.send('x');
        assert!(link.advance().is_empty());
        assert!(link.advance().is_empty());
        assert_eq!(link.advance(), vec!['x']);
    }

    #[test]
    fn test_perfect_link_delivers_next_tick() {
        let mut link = SimulatedLink::new(NetworkConditions::PERFECT, 1);
        link.send(5);
        assert_eq!(link.advance(), vec![5]);
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn test_poor_link_loses_and_duplicates() {
        let mut link = SimulatedLink::new(NetworkConditions::POOR, 42);
        for i in 0..2000u32 {
            link.send(i);
            link.advance();
        }
        for _ in 0..20 {
            link.advance();
        }
        let stats = link.stats();
        assert!(stats.dropped > 0);
        assert!(stats.duplicated > 0);
        assert_eq!(stats.delivered, stats.sent - stats.dropped + stats.duplicated);
    }
}
