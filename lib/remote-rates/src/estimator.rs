//! Decaying arrival-rate estimation.
//!
//! Each estimator keeps an exponentially decayed count of observations. On every observation, the count is decayed by
//! `exp(-Δt/τ)` for the time elapsed since the previous observation and then incremented. For a steady arrival rate
//! `λ`, the count settles around `λτ`, so `count / τ` estimates the rate over a window of a few `τ`.
//!
//! The count and the timestamp of the last observation must change together, so both are packed into a single atomic
//! word: the count as an `f32` in the upper half, and the timestamp as centisecond ticks since the estimator was created
//! in the lower half. Ticks wrap around after roughly 497 days; deltas are computed with wrapping arithmetic. A delta
//! that looks slightly negative (another thread stored a timestamp up to one second later first) is treated as no
//! elapsed time. Any other delta is real elapsed time, however long, so a long idle gap decays the count to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::{Clock, Instant};

/// Default decay period.
pub const DEFAULT_DECAY_PERIOD: Duration = Duration::from_secs(10);

const MIN_DECAY_PERIOD: Duration = Duration::from_millis(100);
const TICKS_PER_SECOND: f64 = 100.0;
const MILLIS_PER_TICK: u128 = 10;
const MAX_RACE_TICKS: u32 = 100;

fn pack(count: f32, tick: u32) -> u64 {
    ((count.to_bits() as u64) << 32) | tick as u64
}

fn unpack(state: u64) -> (f32, u32) {
    (f32::from_bits((state >> 32) as u32), state as u32)
}

fn elapsed_ticks(now: u32, last: u32) -> Option<u32> {
    let delta = now.wrapping_sub(last);
    if delta > u32::MAX - MAX_RACE_TICKS {
        None
    } else {
        Some(delta)
    }
}

/// Lock-free estimator of the arrival rate of observations.
#[derive(Debug)]
pub struct RateEstimator {
    clock: Clock,
    origin: Instant,
    decay_period_secs: f64,
    state: AtomicU64,
}

impl RateEstimator {
    /// Creates a new `RateEstimator` reading time from `clock`, decaying over `decay_period`.
    ///
    /// Decay periods shorter than 100ms are raised to 100ms.
    pub fn new(clock: Clock, decay_period: Duration) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            decay_period_secs: decay_period.max(MIN_DECAY_PERIOD).as_secs_f64(),
            state: AtomicU64::new(pack(0.0, 0)),
        }
    }

    fn now_tick(&self) -> u32 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);

        // Truncation is the wrap-around described in the module docs.
        (elapsed.as_millis() / MILLIS_PER_TICK) as u32
    }

    fn decay(&self, count: f32, elapsed: u32) -> f64 {
        let elapsed_secs = elapsed as f64 / TICKS_PER_SECOND;
        count as f64 * (-elapsed_secs / self.decay_period_secs).exp()
    }

    /// Records one observation.
    pub fn observe(&self) {
        let now = self.now_tick();
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (count, last) = unpack(current);
            let (decayed, tick) = match elapsed_ticks(now, last) {
                Some(elapsed) => (self.decay(count, elapsed), now),
                None => (count as f64, last),
            };

            let next = pack((decayed + 1.0) as f32, tick);
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the estimated arrival rate, in observations per second.
    pub fn estimated_tps(&self) -> f64 {
        let (count, last) = unpack(self.state.load(Ordering::Acquire));
        let decayed = match elapsed_ticks(self.now_tick(), last) {
            Some(elapsed) => self.decay(count, elapsed),
            None => count as f64,
        };
        decayed / self.decay_period_secs
    }

    /// Returns the decay period, in seconds.
    pub fn decay_period_secs(&self) -> f64 {
        self.decay_period_secs
    }
}
