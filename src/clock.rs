//! Monotonic time reference for pacing and frame diagnostics.

use std::time::Instant;

/// Elapsed-time source anchored at a fixed origin, typically process start.
/// Backed by [`Instant`], so it is immune to wall-clock adjustments and
/// never goes backwards.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }

    /// Fractional milliseconds elapsed since the origin.
    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn readings_never_decrease() {
        let clock = MonotonicClock::start();
        let mut previous = clock.now_ms();
        for _ in 0..100 {
            let now = clock.now_ms();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn readings_are_in_milliseconds() {
        let clock = MonotonicClock::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ms() >= 5.0);
        // An Instant-backed clock cannot plausibly report a full second for
        // a 5 ms sleep.
        assert!(clock.now_ms() < 1000.0);
    }
}
