//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Shared primitives and utilities for the gateway runtime."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Monotonic millisecond counter shared by both execution contexts.
//!
//! The counter is a `u32` that wraps after ~49.7 days. Every age computation
//! must go through [`age_ms`] so a wrap never turns into a huge age.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds plus a blocking sleep.
pub trait Clock: Send + Sync {
    /// Current value of the wrapping millisecond counter.
    fn now_ms(&self) -> u32;

    /// Block the calling (cooperative) context for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);
}

/// Elapsed milliseconds between two counter readings, correct across wrap.
pub fn age_ms(now: u32, then: u32) -> u32 {
    now.wrapping_sub(then)
}

/// Timestamp suitable for storage where `0` means "never".
pub fn stamp(now: u32) -> u32 {
    if now == 0 {
        1
    } else {
        now
    }
}

/// Convert a duration into counter milliseconds, saturating at `u32::MAX`.
pub fn duration_to_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Wall clock backed by [`Instant`], truncated to the wrapping counter.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Hand-driven clock for tests and simulations. Sleeping advances time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
    slept: AtomicU32,
}

impl ManualClock {
    pub fn starting_at(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
            slept: AtomicU32::new(0),
        }
    }

    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Total milliseconds spent in [`Clock::sleep_ms`].
    pub fn total_slept(&self) -> u32 {
        self.slept.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.slept.fetch_add(ms, Ordering::SeqCst);
        self.advance(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_is_small_across_counter_wrap() {
        assert_eq!(age_ms(0x0000_0010, 0xFFFF_FFF0), 0x20);
    }

    #[test]
    fn age_without_wrap_is_plain_difference() {
        assert_eq!(age_ms(65_000, 5_000), 60_000);
        assert_eq!(age_ms(5_000, 5_000), 0);
    }

    #[test]
    fn stamp_never_yields_the_never_sentinel() {
        assert_eq!(stamp(0), 1);
        assert_eq!(stamp(42), 42);
    }

    #[test]
    fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::starting_at(100);
        clock.sleep_ms(50);
        clock.sleep_ms(100);
        assert_eq!(clock.now_ms(), 250);
        assert_eq!(clock.total_slept(), 150);
    }

    #[test]
    fn manual_clock_wraps() {
        let clock = ManualClock::starting_at(u32::MAX - 5);
        clock.advance(10);
        assert_eq!(clock.now_ms(), 4);
    }
}
