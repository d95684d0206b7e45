//! # Core Logic - Launch Pacing
//!
//! Minimum spacing between successive launches. Unlike a token bucket there
//! is no burst allowance: two launches are never closer than the delay.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Gate enforcing `delay` between consecutive launches.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    last_launch: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_launch: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Earliest instant the next launch may happen.
    pub fn ready_at(&self) -> Instant {
        match self.last_launch {
            Some(last) => last + self.delay,
            None => Instant::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.delay.is_zero() || Instant::now() >= self.ready_at()
    }

    /// Record a launch at the current instant.
    pub fn mark_launch(&mut self) {
        self.last_launch = Some(Instant::now());
    }

    /// Sleep until the next launch is allowed, then record it.
    pub async fn wait(&mut self) {
        if !self.is_ready() {
            sleep_until(self.ready_at()).await;
        }
        self.mark_launch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_launch_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_millis(200));
        let start = Instant::now();
        pacer.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_launches() {
        let mut pacer = Pacer::new(Duration::from_millis(80));
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_never_waits() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
