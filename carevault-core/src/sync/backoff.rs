// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exponential backoff for transport failures.

use std::time::Duration;

/// Exponential backoff: `delay = min(base * multiplier^attempt, max)`.
///
/// Live sync never gives up; it only waits longer. The attempt counter
/// resets to zero on the next successful exchange.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Backoff {
            base,
            multiplier,
            max,
            attempt: 0,
        }
    }

    /// Returns the delay for the current attempt and advances the counter.
    ///
    /// Saturates at `max`: the counter stops advancing once the cap is
    /// reached, so the multiplied delay stays finite no matter how long a
    /// failure streak runs.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt as i32);
        let delay_secs = self.base.as_secs_f64() * factor;
        if !delay_secs.is_finite() || delay_secs >= self.max.as_secs_f64() {
            return self.max;
        }
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64(delay_secs)
    }

    /// Resets the attempt counter after a successful exchange.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_increase_then_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(8));

        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        // Capped
        assert_eq!(delays[4], Duration::from_secs(8));
    }

    #[test]
    fn test_long_failure_streak_stays_at_cap() {
        let mut backoff = Backoff::default();

        // Far past the point where 2^attempt overflows f64 seconds
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            last = backoff.next_delay();
            assert!(last <= Duration::from_secs(60));
        }
        assert_eq!(last, Duration::from_secs(60));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
