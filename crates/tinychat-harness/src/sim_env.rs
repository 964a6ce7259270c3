//! Simulation environment.
//!
//! Time only moves when a test calls [`SimEnv::advance`]. Randomness comes
//! from a seeded ChaCha20 stream. Forks share the clock but draw from their
//! own stream, so each simulated peer is independent yet reproducible.

use std::{
    ops::Sub,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use tinychat_core::Environment;

/// Wall-clock time at simulation start: 2024-01-01T00:00:00Z.
const EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Point on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since simulation start.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic environment for simulation.
#[derive(Debug, Clone)]
pub struct SimEnv {
    seed: u64,
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment drawing randomness from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Environment sharing this clock with an independent random stream.
    pub fn fork(&self, stream: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(stream.wrapping_add(1));
        Self { seed: self.seed, clock: Arc::clone(&self.clock), rng: Arc::new(Mutex::new(rng)) }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Move the shared clock forward.
    pub fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock = clock.saturating_add(by);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(*self.clock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn wall_clock_millis(&self) -> u64 {
        EPOCH_MILLIS.saturating_add(self.now().since_start().as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        let (mut x, mut y) = ([0u8; 16], [0u8; 16]);

        a.random_bytes(&mut x);
        b.random_bytes(&mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn forks_share_clock_not_randomness() {
        let env = SimEnv::with_seed(7);
        let a = env.fork(0);
        let b = env.fork(1);

        env.advance(Duration::from_secs(3));
        assert_eq!(a.now(), b.now());
        assert_eq!(a.now().since_start(), Duration::from_secs(3));

        let (mut x, mut y) = ([0u8; 16], [0u8; 16]);
        a.random_bytes(&mut x);
        b.random_bytes(&mut y);
        assert_ne!(x, y);
    }

    #[test]
    fn instants_subtract_to_elapsed() {
        let env = SimEnv::new();
        let start = env.now();
        env.advance(Duration::from_millis(1500));
        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(start - env.now(), Duration::ZERO);
    }

    #[test]
    fn wall_clock_starts_at_epoch() {
        let env = SimEnv::new();
        assert_eq!(env.wall_clock_millis(), EPOCH_MILLIS);
        env.advance(Duration::from_secs(1));
        assert_eq!(env.wall_clock_millis(), EPOCH_MILLIS + 1000);
    }
}
