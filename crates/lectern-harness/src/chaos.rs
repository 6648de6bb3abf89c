//! Seeded failure injection.
//!
//! Chaos decisions come from a ChaCha RNG seeded per run, so a failing seed
//! replays the exact same sequence of injected failures.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Failure rates for the simulated backend. All rates are in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosConfig {
    /// RNG seed.
    pub seed: u64,
    /// Probability a message or presence read fails.
    pub fetch_failure_rate: f64,
    /// Probability a message insert fails.
    pub insert_failure_rate: f64,
    /// Probability a presence upsert fails.
    pub touch_failure_rate: f64,
    /// Probability a channel open is rejected outright.
    pub open_failure_rate: f64,
    /// Probability a channel never confirms its subscription.
    pub silent_channel_rate: f64,
}

impl ChaosConfig {
    /// No injected failures.
    pub fn calm(seed: u64) -> Self {
        Self {
            seed,
            fetch_failure_rate: 0.0,
            insert_failure_rate: 0.0,
            touch_failure_rate: 0.0,
            open_failure_rate: 0.0,
            silent_channel_rate: 0.0,
        }
    }

    /// Every operation fails at the same rate.
    pub fn uniform(seed: u64, rate: f64) -> Self {
        Self {
            seed,
            fetch_failure_rate: rate,
            insert_failure_rate: rate,
            touch_failure_rate: rate,
            open_failure_rate: rate,
            silent_channel_rate: rate,
        }
    }
}

/// Which operation a chaos decision is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosTarget {
    /// Message or presence read.
    Fetch,
    /// Message insert.
    Insert,
    /// Presence upsert.
    Touch,
    /// Channel open rejected.
    Open,
    /// Channel never confirms.
    Silence,
}

/// Live chaos source.
#[derive(Debug, Clone)]
pub struct Chaos {
    config: ChaosConfig,
    rng: ChaCha8Rng,
    injected: u64,
}

impl Chaos {
    /// Create a chaos source from its configuration.
    pub fn new(config: ChaosConfig) -> Self {
        Self { config, rng: ChaCha8Rng::seed_from_u64(config.seed), injected: 0 }
    }

    /// Decide whether this operation fails.
    pub fn should_fail(&mut self, target: ChaosTarget) -> bool {
        let rate = match target {
            ChaosTarget::Fetch => self.config.fetch_failure_rate,
            ChaosTarget::Insert => self.config.insert_failure_rate,
            ChaosTarget::Touch => self.config.touch_failure_rate,
            ChaosTarget::Open => self.config.open_failure_rate,
            ChaosTarget::Silence => self.config.silent_channel_rate,
        };
        if rate <= 0.0 {
            return false;
        }

        let fail = self.rng.gen_bool(rate.min(1.0));
        if fail {
            self.injected += 1;
        }
        fail
    }

    /// Failures injected so far.
    pub fn injected(&self) -> u64 {
        self.injected
    }

    /// The configuration in use.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }
}
