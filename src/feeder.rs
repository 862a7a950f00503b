//! Decoder feed scheduler.
//!
//! Delivers the pre-loaded compressed payload to the decoder once per frame
//! interval, on its own thread, until the stop flag is raised. Each cycle is
//! paced against the monotonic clock: the time spent writing (and anything
//! else in the cycle) is deducted from the sleep, and the sleep is clamped
//! at zero when a cycle overruns the interval.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::clock::MonotonicClock;
use crate::codec::CodecSink;
use crate::codec::WriteError;

/// Consecutive zero-progress writes tolerated before the device is declared
/// stalled. A healthy decoder drains its stream buffer within a few calls;
/// thousands of fruitless attempts mean it is not consuming at all.
pub const MAX_STALLED_WRITES: u32 = 1000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("decoder made no progress after {0} consecutive writes")]
    Stalled(u32),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Periodic task feeding one payload per frame interval into a
/// [`CodecSink`].
pub struct FeedScheduler<W> {
    sink: W,
    payload: Arc<[u8]>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    clock: MonotonicClock,
    frames: u64,
}

impl<W: CodecSink> FeedScheduler<W> {
    pub fn new(
        sink: W,
        payload: Arc<[u8]>,
        interval: Duration,
        stop: Arc<AtomicBool>,
        clock: MonotonicClock,
    ) -> Self {
        FeedScheduler {
            sink,
            payload,
            interval,
            stop,
            clock,
            frames: 0,
        }
    }

    /// Number of payloads fully delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Writes the whole payload into the sink, advancing only on actual
    /// progress. Returns once every byte has been accepted, or fails after
    /// [`MAX_STALLED_WRITES`] consecutive calls without progress.
    pub fn write_frame(&mut self) -> Result<(), FeedError> {
        let mut offset = 0;
        let mut stalled = 0u32;

        while offset < self.payload.len() {
            let written = self.sink.write(&self.payload[offset..])?;
            if written == 0 {
                stalled += 1;
                if stalled >= MAX_STALLED_WRITES {
                    return Err(FeedError::Stalled(stalled));
                }
            } else {
                stalled = 0;
                offset += written;
            }
        }

        Ok(())
    }

    /// Feeds the payload at the target cadence until the stop flag is
    /// raised or the sink fails.
    pub fn run(&mut self) -> Result<(), FeedError> {
        while !self.stop.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();

            self.write_frame()?;
            debug!(
                "frame {} uploaded at {:.3} ms",
                self.frames,
                self.clock.now_ms()
            );
            self.frames += 1;

            thread::sleep(pacing_delay(self.interval, cycle_start.elapsed()));
        }

        Ok(())
    }
}

/// Time left in the current cycle. Never negative, even when the upload
/// overran the frame interval.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink scripted with the number of bytes to accept on each call,
    /// recording the length of every slice it is offered.
    struct ScriptedSink {
        script: Vec<usize>,
        call: usize,
        offered: Vec<usize>,
        received: usize,
    }

    impl ScriptedSink {
        fn new(script: Vec<usize>) -> Self {
            ScriptedSink {
                script,
                call: 0,
                offered: Vec::new(),
                received: 0,
            }
        }
    }

    impl CodecSink for ScriptedSink {
        fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
            self.offered.push(data.len());
            let accepted = self.script.get(self.call).copied().unwrap_or(data.len());
            self.call += 1;
            self.received += accepted;
            Ok(accepted)
        }
    }

    impl CodecSink for &mut ScriptedSink {
        fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
            (**self).write(data)
        }
    }

    fn scheduler<W: CodecSink>(sink: W, payload_len: usize) -> FeedScheduler<W> {
        FeedScheduler::new(
            sink,
            vec![0xabu8; payload_len].into(),
            Duration::from_micros(16_666),
            Arc::new(AtomicBool::new(false)),
            MonotonicClock::start(),
        )
    }

    #[test]
    fn partial_writes_complete_the_frame() {
        let mut sink = ScriptedSink::new(vec![100, 0, 0, 400]);
        let mut feeder = scheduler(&mut sink, 500);

        feeder.write_frame().unwrap();

        // Zero-progress calls must not advance the offset.
        assert_eq!(sink.offered, vec![500, 400, 400, 400]);
        assert_eq!(sink.received, 500);
    }

    #[test]
    fn persistent_zero_progress_is_a_stall() {
        let mut sink = ScriptedSink::new(vec![0; MAX_STALLED_WRITES as usize + 10]);
        let mut feeder = scheduler(&mut sink, 500);

        let result = feeder.write_frame();
        assert!(matches!(result, Err(FeedError::Stalled(n)) if n == MAX_STALLED_WRITES));
        assert_eq!(sink.received, 0);
    }

    #[test]
    fn progress_resets_the_stall_counter() {
        // Alternating stall/progress sequences stay below the budget.
        let mut script = Vec::new();
        for _ in 0..10 {
            script.extend_from_slice(&[0, 0, 50]);
        }
        let mut sink = ScriptedSink::new(script);
        let mut feeder = scheduler(&mut sink, 500);

        feeder.write_frame().unwrap();
        assert_eq!(sink.received, 500);
    }

    #[test]
    fn write_errors_propagate() {
        struct FailingSink;
        impl CodecSink for FailingSink {
            fn write(&mut self, _data: &[u8]) -> Result<usize, WriteError> {
                Err(WriteError(nix::errno::Errno::EIO))
            }
        }

        let mut feeder = scheduler(FailingSink, 500);
        assert!(matches!(feeder.write_frame(), Err(FeedError::Write(_))));
    }

    #[test]
    fn pacing_delay_is_clamped_at_zero() {
        let interval = Duration::from_micros(16_666);

        // Writing + diagnostics took 20 ms against a 16.666 ms target.
        assert_eq!(
            pacing_delay(interval, Duration::from_millis(20)),
            Duration::ZERO
        );
        assert_eq!(
            pacing_delay(interval, Duration::from_millis(10)),
            Duration::from_micros(6_666)
        );
        assert_eq!(pacing_delay(interval, interval), Duration::ZERO);
    }

    #[test]
    fn run_stops_when_the_flag_is_raised() {
        /// Raises the stop flag after accepting its second frame.
        struct StopAfterTwo {
            frames: usize,
            stop: Arc<AtomicBool>,
        }
        impl CodecSink for StopAfterTwo {
            fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
                self.frames += 1;
                if self.frames >= 2 {
                    self.stop.store(true, Ordering::SeqCst);
                }
                Ok(data.len())
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let sink = StopAfterTwo {
            frames: 0,
            stop: Arc::clone(&stop),
        };
        let mut feeder = FeedScheduler::new(
            sink,
            vec![0u8; 16].into(),
            Duration::from_micros(100),
            stop,
            MonotonicClock::start(),
        );

        feeder.run().unwrap();
        assert_eq!(feeder.frames(), 2);
    }
}
