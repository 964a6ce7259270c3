//! Production environment.
//!
//! Tokio's monotonic clock, tokio sleep and OS randomness. The clock follows
//! `tokio::time::pause`, so handshake timers and sleeps stay consistent in
//! paused-time tests. Otherwise behaviour is not reproducible; use a seeded
//! environment for tests.

use std::time::Duration;

use tinychat_core::Environment;

/// Production environment using system time and the OS CSPRNG.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Without working randomness no
/// key material can be generated safely.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
