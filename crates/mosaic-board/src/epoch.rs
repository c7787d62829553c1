//! Epoch arithmetic and time sources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Used by tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn new(ms: u64) -> Self {
        Self {
            ms: AtomicU64::new(ms),
        }
    }

    pub fn set_ms(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.ms.fetch_add(secs.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

/// Maps unix time onto epoch numbers.
///
/// Epoch `n` covers `[zero + n*len, zero + (n+1)*len)`. Times before
/// `zero` are epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochClock {
    pub epoch_zero_unix: u64,
    pub epoch_seconds: u64,
}

impl Default for EpochClock {
    fn default() -> Self {
        Self {
            epoch_zero_unix: 1_730_937_600,
            epoch_seconds: 3600,
        }
    }
}

impl EpochClock {
    pub fn new(epoch_zero_unix: u64, epoch_seconds: u64) -> Self {
        Self {
            epoch_zero_unix,
            epoch_seconds: epoch_seconds.max(1),
        }
    }

    /// Epoch containing `now` (unix seconds).
    pub fn epoch_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.epoch_zero_unix) / self.epoch_seconds
    }

    /// Unix second at which `epoch` begins.
    pub fn epoch_start(&self, epoch: u64) -> u64 {
        self.epoch_zero_unix
            .saturating_add(epoch.saturating_mul(self.epoch_seconds))
    }

    /// Unix second at which `epoch` ends (exclusive).
    pub fn epoch_end(&self, epoch: u64) -> u64 {
        self.epoch_start(epoch.saturating_add(1))
    }

    /// Seconds until the current epoch ends.
    pub fn seconds_left(&self, now: u64) -> u64 {
        self.epoch_end(self.epoch_at(now)).saturating_sub(now)
    }

    /// Seconds until the end of `epoch`, zero if already past.
    pub fn seconds_until_end_of(&self, epoch: u64, now: u64) -> u64 {
        self.epoch_end(epoch).saturating_sub(now)
    }

    /// Current epoch according to `clock`.
    pub fn current(&self, clock: &dyn Clock) -> u64 {
        self.epoch_at(clock.now_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_boundaries() {
        let ec = EpochClock::new(1000, 60);
        assert_eq!(ec.epoch_at(0), 0);
        assert_eq!(ec.epoch_at(1000), 0);
        assert_eq!(ec.epoch_at(1059), 0);
        assert_eq!(ec.epoch_at(1060), 1);
        assert_eq!(ec.epoch_start(2), 1120);
        assert_eq!(ec.epoch_end(2), 1180);
    }

    #[test]
    fn seconds_left_counts_down() {
        let ec = EpochClock::new(1000, 60);
        assert_eq!(ec.seconds_left(1000), 60);
        assert_eq!(ec.seconds_left(1059), 1);
        assert_eq!(ec.seconds_until_end_of(0, 2000), 0);
        assert_eq!(ec.seconds_until_end_of(3, 1200), 40);
    }

    #[test]
    fn zero_length_epoch_is_clamped() {
        let ec = EpochClock::new(0, 0);
        assert_eq!(ec.epoch_seconds, 1);
        assert_eq!(ec.epoch_at(5), 5);
    }

    #[test]
    fn manual_clock_drives_epochs() {
        let ec = EpochClock::new(0, 3600);
        let clock = ManualClock::new(0);
        assert_eq!(ec.current(&clock), 0);
        clock.advance_secs(3600);
        assert_eq!(ec.current(&clock), 1);
        clock.set_ms(7_200_500);
        assert_eq!(ec.current(&clock), 2);
    }
}
