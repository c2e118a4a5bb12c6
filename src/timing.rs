//! Tracks a single named deadline.
//!
//! Spec §4.2 names six deadlines; all of them reduce to the same shape: an
//! instant to expire at, armed at a state-transition point and checked at
//! the next suspension point. This is that shape, kept separate from the
//! `Duration` values in [`crate::Config`] so the state machines never touch
//! a clock directly (they only see `Duration`s and `bool`s coming back from
//! the driver in `session.rs`).

use std::time::{Duration, Instant};

/// A single armed deadline.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Arm a deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            expires_at: Instant::now() + duration,
        }
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Whether `now` is at or past the armed instant.
    pub fn has_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_expired_immediately() {
        let d = Deadline::after(Duration::from_secs(1));
        assert!(!d.has_expired());
        assert!(d.remaining() > Duration::ZERO);
    }

    #[test]
    fn expired_when_duration_is_zero() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.has_expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }
}
