//! Frame poll loop.
//!
//! Continuously drains completed capture buffers and immediately requeues
//! them so the device never runs out of free buffers. The loop alternates
//! between a short bounded sleep (to cap CPU usage) and a drain pass that
//! retrieves until nothing is ready, resubmitting each retrieved index
//! before looking at the next one. There is no backpressure: with the ring
//! bounded at the pool size, a delayed requeue simply stalls frame
//! production at the device until the loop catches up.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::clock::MonotonicClock;
use crate::queue::CaptureQueue;
use crate::queue::RetrieveError;
use crate::queue::SubmitError;

/// Interval between drain passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Source of completed capture buffers. Implemented by [`CaptureQueue`] for
/// the real device; tests substitute their own.
pub trait FrameSource {
    /// Non-blocking poll; `Ok(None)` when nothing is ready.
    fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError>;
    /// Hands `index` back to the device.
    fn resubmit(&mut self, index: u32) -> Result<(), SubmitError>;
}

impl FrameSource for CaptureQueue {
    fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError> {
        CaptureQueue::try_retrieve(self)
    }

    fn resubmit(&mut self, index: u32) -> Result<(), SubmitError> {
        CaptureQueue::resubmit(self, index)
    }
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("retrieving buffer failed: {0}")]
    Retrieve(#[from] RetrieveError),
    #[error("requeueing buffer failed: {0}")]
    Resubmit(#[from] SubmitError),
}

/// The drain/requeue loop, normally run on the main thread.
pub struct FramePump<S> {
    source: S,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    clock: MonotonicClock,
    frames: u64,
}

impl<S: FrameSource> FramePump<S> {
    pub fn new(
        source: S,
        poll_interval: Duration,
        stop: Arc<AtomicBool>,
        clock: MonotonicClock,
    ) -> Self {
        FramePump {
            source,
            poll_interval,
            stop,
            clock,
            frames: 0,
        }
    }

    /// Total frames pumped so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Hands the source back, typically for teardown.
    pub fn into_source(self) -> S {
        self.source
    }

    /// One drain pass: retrieve and immediately resubmit every buffer that
    /// is ready. Returns the number of frames pumped. No index is ever left
    /// unqueued when this returns.
    pub fn drain(&mut self) -> Result<usize, PumpError> {
        let mut pumped = 0;

        while let Some(index) = self.source.try_retrieve()? {
            debug!(
                "frame {} (buffer {}) received at {:.3} ms",
                self.frames,
                index,
                self.clock.now_ms()
            );
            self.source.resubmit(index)?;
            self.frames += 1;
            pumped += 1;
        }

        Ok(pumped)
    }

    /// Alternates sleeping and draining until the stop flag is raised or the
    /// source fails.
    pub fn run(&mut self) -> Result<(), PumpError> {
        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(self.poll_interval);
            self.drain()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Retrieve(Option<u32>),
        Resubmit(u32),
    }

    /// Source scripted with the completions it reports, recording every
    /// operation in order.
    struct ScriptedSource {
        completions: VecDeque<Option<u32>>,
        ops: Vec<Op>,
        stop: Option<Arc<AtomicBool>>,
    }

    impl ScriptedSource {
        fn new(completions: Vec<Option<u32>>) -> Self {
            ScriptedSource {
                completions: completions.into(),
                ops: Vec::new(),
                stop: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError> {
            let next = self.completions.pop_front().unwrap_or(None);
            self.ops.push(Op::Retrieve(next));
            if self.completions.is_empty() {
                if let Some(stop) = &self.stop {
                    stop.store(true, Ordering::SeqCst);
                }
            }
            Ok(next)
        }

        fn resubmit(&mut self, index: u32) -> Result<(), SubmitError> {
            self.ops.push(Op::Resubmit(index));
            Ok(())
        }
    }

    impl FrameSource for &mut ScriptedSource {
        fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError> {
            (**self).try_retrieve()
        }

        fn resubmit(&mut self, index: u32) -> Result<(), SubmitError> {
            (**self).resubmit(index)
        }
    }

    fn pump<S: FrameSource>(source: S) -> FramePump<S> {
        FramePump::new(
            source,
            Duration::from_micros(100),
            Arc::new(AtomicBool::new(false)),
            MonotonicClock::start(),
        )
    }

    #[test]
    fn drain_requeues_every_retrieved_index() {
        let mut source = ScriptedSource::new(vec![Some(2), Some(0), Some(5), None]);
        let mut pump = pump(&mut source);

        assert_eq!(pump.drain().unwrap(), 3);
        assert_eq!(pump.frames(), 3);

        // Each index is resubmitted before the next retrieve, and the pass
        // ends on an empty poll - nothing is left dequeued.
        assert_eq!(
            source.ops,
            vec![
                Op::Retrieve(Some(2)),
                Op::Resubmit(2),
                Op::Retrieve(Some(0)),
                Op::Resubmit(0),
                Op::Retrieve(Some(5)),
                Op::Resubmit(5),
                Op::Retrieve(None),
            ]
        );
    }

    #[test]
    fn drained_queue_yields_nothing_without_new_completions() {
        // The device completed buffer 3; after the pump requeues it, a
        // second poll with no new completion must come up empty.
        let mut source = ScriptedSource::new(vec![Some(3), None]);
        let mut pump = pump(&mut source);

        assert_eq!(pump.drain().unwrap(), 1);
        assert_eq!(pump.drain().unwrap(), 0);
        assert_eq!(
            source.ops,
            vec![
                Op::Retrieve(Some(3)),
                Op::Resubmit(3),
                Op::Retrieve(None),
                Op::Retrieve(None),
            ]
        );
    }

    #[test]
    fn run_stops_when_the_flag_is_raised() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::new(vec![Some(1), None, Some(4), None]);
        source.stop = Some(Arc::clone(&stop));

        let mut pump = FramePump::new(
            source,
            Duration::from_micros(100),
            stop,
            MonotonicClock::start(),
        );

        pump.run().unwrap();
        assert_eq!(pump.frames(), 2);
    }

    #[test]
    fn retrieve_errors_terminate_the_loop() {
        struct BrokenSource;
        impl FrameSource for BrokenSource {
            fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError> {
                Err(RetrieveError::NotQueued(3))
            }
            fn resubmit(&mut self, _index: u32) -> Result<(), SubmitError> {
                Ok(())
            }
        }

        let mut pump = pump(BrokenSource);
        assert!(matches!(pump.run(), Err(PumpError::Retrieve(_))));
    }
}
