//! Wall-clock abstraction.
//!
//! Period keys are a pure function of "now", so every component that needs
//! the current time asks a [`Clock`] instead of calling `Utc::now()` directly.
//! Tests substitute a manual clock to simulate period rollover.

use crate::Timestamp;
use chrono::Utc;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        let after = Utc::now();
        assert!(before <= now && now <= after);
    }
}
