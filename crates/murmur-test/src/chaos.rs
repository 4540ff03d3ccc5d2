//! Per-link chaos: seeded delay, loss, duplication and reordering
//!
//! Time here is the swarm's own tick, not wall clock, so every scenario
//! replays identically from its seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use murmur_core::Tick;

/// Link misbehavior knobs, all rates in 0.0..=1.0.
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Delivery delay range in ticks, inclusive
    pub min_delay: Tick,
    pub max_delay: Tick,
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    /// Chance a packet is held back an extra `reorder_delay` ticks,
    /// letting later traffic overtake it
    pub reorder_rate: f64,
    pub reorder_delay: Tick,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            min_delay: 1,
            max_delay: 3,
            loss_rate: 0.02,
            duplicate_rate: 0.01,
            reorder_rate: 0.05,
            reorder_delay: 4,
        }
    }
}

impl ChaosConfig {
    /// Instant, perfect delivery.
    pub fn ideal() -> Self {
        ChaosConfig {
            min_delay: 1,
            max_delay: 1,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: 0,
        }
    }

    /// Flaky radio: heavy loss, frequent duplication and reordering.
    pub fn hostile() -> Self {
        ChaosConfig {
            min_delay: 1,
            max_delay: 6,
            loss_rate: 0.15,
            duplicate_rate: 0.08,
            reorder_rate: 0.2,
            reorder_delay: 8,
        }
    }
}

/// What the link did to traffic so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// One directed link with its own rng stream.
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    /// (delivery tick, payload), unordered
    in_flight: Vec<(Tick, Vec<u8>)>,
    now: Tick,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn with_seed(config: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            now: 0,
            stats: ChaosStats::default(),
        }
    }

    pub fn stats(&self) -> ChaosStats {
        self.stats
    }

    fn schedule(&mut self, payload: Vec<u8>) {
        let mut delay = self
            .rng
            .gen_range(self.config.min_delay..=self.config.max_delay);
        if self.config.reorder_rate > 0.0 && self.rng.gen_bool(self.config.reorder_rate) {
            delay += self.config.reorder_delay;
            self.stats.reordered += 1;
        }
        self.in_flight.push((self.now + delay, payload));
    }

    /// Put one payload on the wire.
    pub fn send(&mut self, payload: Vec<u8>) {
        self.stats.sent += 1;
        if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate) {
            self.stats.lost += 1;
            return;
        }
        if self.config.duplicate_rate > 0.0 && self.rng.gen_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.schedule(payload.clone());
        }
        self.schedule(payload);
    }

    /// Advance one tick and take whatever is due, oldest due-time first.
    pub fn tick(&mut self) -> Vec<Vec<u8>> {
        self.now += 1;
        let now = self.now;

        let mut due: Vec<(Tick, Vec<u8>)> = Vec::new();
        self.in_flight.retain_mut(|(at, payload)| {
            if *at <= now {
                due.push((*at, std::mem::take(payload)));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);

        self.stats.delivered += due.len() as u64;
        due.into_iter().map(|(_, payload)| payload).collect()
    }
}
