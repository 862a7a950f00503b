//! Capture queue: the fixed ring of DMABUF-backed buffers submitted to the
//! ionvideo device.
//!
//! Ownership of every buffer index alternates between the device (queued,
//! waiting to be filled) and the application (dequeued). The original
//! protocol leaves that alternation entirely to call-site discipline; here
//! the queue tracks an explicit per-index state so that a double submit or a
//! completion for a buffer we never queued is rejected before it can turn
//! into undefined behavior at the device boundary.

use enumn::N;
use log::{debug, info};
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ioctl;
use crate::ioctl::DequeuedBuffer;
use crate::ioctl::DqBufError;
use crate::ioctl::Format;
use crate::ioctl::QBufError;
use crate::ioctl::ReqbufsError;
use crate::ioctl::SFmtError;
use crate::ioctl::StreamOffError;
use crate::ioctl::StreamOnError;
use crate::MemoryType;
use crate::PixelFormat;
use crate::QueueType;

/// Default ionvideo device node.
pub const IONVIDEO_DEVICE: &str = "/dev/video13";

/// Pixel formats the ionvideo path can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum CaptureFormat {
    Nv12 = PixelFormat::from_fourcc(b"NV12").to_u32(),
    Rgb24 = PixelFormat::from_fourcc(b"RGB3").to_u32(),
    Rgb32 = PixelFormat::from_fourcc(b"RGB4").to_u32(),
}

impl CaptureFormat {
    pub fn pixel_format(self) -> PixelFormat {
        PixelFormat::from_u32(self as u32)
    }

    /// Size in bytes of one captured frame. ionvideo sizes NV12 buffers at
    /// two bytes per pixel.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            CaptureFormat::Nv12 => pixels * 2,
            CaptureFormat::Rgb24 => pixels * 3,
            CaptureFormat::Rgb32 => pixels * 4,
        }
    }
}

/// Ownership of a buffer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Owned by the device, waiting to be filled.
    Queued,
    /// Filled and handed back to the application.
    Dequeued,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    dmabuf: RawFd,
    length: u32,
    state: SlotState,
}

/// Per-index bookkeeping enforcing the submit/retrieve alternation.
#[derive(Debug, Default)]
struct SlotTable {
    slots: Vec<Option<Slot>>,
}

impl SlotTable {
    fn new(count: usize) -> Self {
        SlotTable {
            slots: vec![None; count],
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Records that `index` was handed to the device. Fails if it is already
    /// device-owned.
    fn mark_queued(&mut self, index: usize, dmabuf: RawFd, length: u32) -> Result<(), SubmitError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SubmitError::UnknownIndex(index))?;
        match slot {
            Some(s) if s.state == SlotState::Queued => Err(SubmitError::AlreadyQueued(index)),
            _ => {
                *slot = Some(Slot {
                    dmabuf,
                    length,
                    state: SlotState::Queued,
                });
                Ok(())
            }
        }
    }

    /// Records that the device completed `index`. Fails if the index is not
    /// currently device-owned.
    fn mark_dequeued(&mut self, index: u32) -> Result<(), RetrieveError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(RetrieveError::UnknownIndex(index))?;
        match slot {
            Some(s) if s.state == SlotState::Queued => {
                s.state = SlotState::Dequeued;
                Ok(())
            }
            _ => Err(RetrieveError::NotQueued(index)),
        }
    }

    /// The descriptor last submitted for `index`, for resubmission.
    fn dequeued_slot(&self, index: usize) -> Result<Slot, SubmitError> {
        match self.slots.get(index) {
            None => Err(SubmitError::UnknownIndex(index)),
            Some(None) => Err(SubmitError::NeverSubmitted(index)),
            Some(Some(s)) if s.state == SlotState::Queued => {
                Err(SubmitError::AlreadyQueued(index))
            }
            Some(Some(s)) => Ok(*s),
        }
    }

    fn num_queued(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open capture device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("format negotiation failed: {0}")]
    SetFormat(#[from] SFmtError),
    #[error("driver selected unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("buffer request failed: {0}")]
    RequestBuffers(#[from] ReqbufsError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("buffer index {0} out of range")]
    UnknownIndex(usize),
    #[error("buffer {0} is already queued")]
    AlreadyQueued(usize),
    #[error("buffer {0} was never submitted")]
    NeverSubmitted(usize),
    #[error("queueing buffer failed: {0}")]
    QBuf(#[from] QBufError),
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("device completed buffer {0} which is out of range")]
    UnknownIndex(u32),
    #[error("device completed buffer {0} which was not queued")]
    NotQueued(u32),
    #[error("dequeueing buffer failed: {0}")]
    DqBuf(DqBufError),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot start streaming: only {queued} of {total} buffers are queued")]
    BuffersNotQueued { queued: usize, total: usize },
    #[error("starting stream failed: {0}")]
    On(#[from] StreamOnError),
    #[error("stopping stream failed: {0}")]
    Off(#[from] StreamOffError),
}

/// The capture side of the session: device handle, negotiated format and
/// buffer-index bookkeeping.
pub struct CaptureQueue {
    device: File,
    capture_format: CaptureFormat,
    format: Format,
    slots: SlotTable,
    streaming: bool,
}

impl CaptureQueue {
    /// Opens the capture device non-blocking and negotiates the geometry and
    /// pixel format. The driver may adjust the request; the adjusted format
    /// decides the frame size.
    pub fn open(
        path: &Path,
        width: u32,
        height: u32,
        format: CaptureFormat,
    ) -> Result<Self, QueueError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| QueueError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let negotiated = ioctl::s_fmt(
            &device,
            QueueType::VideoCapture,
            width,
            height,
            format.pixel_format(),
        )?;

        let capture_format = CaptureFormat::n(negotiated.pixelformat.to_u32())
            .ok_or(QueueError::UnsupportedFormat(negotiated.pixelformat))?;

        info!(
            "capture format: {}x{} {}",
            negotiated.width, negotiated.height, negotiated.pixelformat
        );

        Ok(CaptureQueue {
            device,
            capture_format,
            format: negotiated,
            slots: SlotTable::default(),
            streaming: false,
        })
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Size in bytes of one captured frame for the negotiated format.
    pub fn frame_len(&self) -> usize {
        self.capture_format
            .frame_len(self.format.width, self.format.height)
    }

    /// Tells the driver how many externally-allocated DMABUF buffers will be
    /// supplied. The driver may grant fewer; the granted count becomes the
    /// size of the ring.
    pub fn request_buffers(&mut self, count: u32) -> Result<usize, QueueError> {
        let granted: usize = ioctl::reqbufs(
            &self.device,
            QueueType::VideoCapture,
            MemoryType::DmaBuf,
            count,
        )?;
        self.slots = SlotTable::new(granted);

        Ok(granted)
    }

    /// Hands buffer `index`, backed by `dmabuf`, to the device. Must be
    /// called once per buffer before streaming starts.
    ///
    /// The queue keeps a non-owning copy of the fd for later resubmission;
    /// the buffer pool must outlive the queue.
    pub fn submit(&mut self, index: usize, dmabuf: RawFd, length: u32) -> Result<(), SubmitError> {
        // Reject alternation violations before they reach the device.
        match self.slots.slots.get(index) {
            None => return Err(SubmitError::UnknownIndex(index)),
            Some(Some(slot)) if slot.state == SlotState::Queued => {
                return Err(SubmitError::AlreadyQueued(index))
            }
            _ => (),
        }

        ioctl::qbuf_dmabuf(&self.device, QueueType::VideoCapture, index, dmabuf, length)?;
        self.slots.mark_queued(index, dmabuf, length)
    }

    /// Re-arms buffer `index` with the descriptor it was last submitted
    /// with.
    pub fn resubmit(&mut self, index: u32) -> Result<(), SubmitError> {
        let slot = self.slots.dequeued_slot(index as usize)?;
        ioctl::qbuf_dmabuf(
            &self.device,
            QueueType::VideoCapture,
            index as usize,
            slot.dmabuf,
            slot.length,
        )?;
        self.slots.mark_queued(index as usize, slot.dmabuf, slot.length)
    }

    /// Non-blocking poll for a completed buffer. `Ok(None)` means no buffer
    /// is ready, which is the expected common case. On success the returned
    /// index is owned by the application until it is resubmitted.
    pub fn try_retrieve(&mut self) -> Result<Option<u32>, RetrieveError> {
        let dequeued: DequeuedBuffer =
            match ioctl::dqbuf(&self.device, QueueType::VideoCapture) {
                Ok(buf) => buf,
                Err(DqBufError::NotReady) => return Ok(None),
                Err(e) => return Err(RetrieveError::DqBuf(e)),
            };

        debug!(
            "dequeued buffer {} sequence {} ({} bytes)",
            dequeued.index, dequeued.sequence, dequeued.bytesused
        );

        self.slots.mark_dequeued(dequeued.index)?;
        Ok(Some(dequeued.index))
    }

    /// Enables the capture pipeline. All buffers must have been submitted
    /// first.
    pub fn stream_on(&mut self) -> Result<(), StreamError> {
        let queued = self.slots.num_queued();
        let total = self.slots.len();
        if total == 0 || queued != total {
            return Err(StreamError::BuffersNotQueued { queued, total });
        }

        ioctl::streamon(&self.device, QueueType::VideoCapture)?;
        self.streaming = true;

        Ok(())
    }

    /// Stops the capture pipeline, returning all queued buffers to the
    /// application.
    pub fn stream_off(&mut self) -> Result<(), StreamError> {
        if !self.streaming {
            return Ok(());
        }

        ioctl::streamoff(&self.device, QueueType::VideoCapture)?;
        self.streaming = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_follows_pixel_format() {
        assert_eq!(CaptureFormat::Nv12.frame_len(1280, 720), 1280 * 720 * 2);
        assert_eq!(CaptureFormat::Rgb24.frame_len(1280, 720), 1280 * 720 * 3);
        assert_eq!(CaptureFormat::Rgb32.frame_len(1280, 720), 1280 * 720 * 4);
    }

    #[test]
    fn capture_format_from_fourcc() {
        let nv12 = PixelFormat::from_fourcc(b"NV12").to_u32();
        assert_eq!(CaptureFormat::n(nv12), Some(CaptureFormat::Nv12));
        let mjpg = PixelFormat::from_fourcc(b"MJPG").to_u32();
        assert_eq!(CaptureFormat::n(mjpg), None);
    }

    #[test]
    fn slot_alternation_is_enforced() {
        let mut slots = SlotTable::new(2);

        // First submission of each index.
        slots.mark_queued(0, 10, 64).unwrap();
        slots.mark_queued(1, 11, 64).unwrap();
        assert_eq!(slots.num_queued(), 2);

        // Double submit is rejected.
        assert!(matches!(
            slots.mark_queued(0, 10, 64),
            Err(SubmitError::AlreadyQueued(0))
        ));

        // Retrieve, then the same index can be queued again.
        slots.mark_dequeued(0).unwrap();
        assert_eq!(slots.num_queued(), 1);
        assert!(matches!(
            slots.mark_dequeued(0),
            Err(RetrieveError::NotQueued(0))
        ));
        slots.mark_queued(0, 10, 64).unwrap();
        assert_eq!(slots.num_queued(), 2);
    }

    #[test]
    fn unknown_indices_are_rejected() {
        let mut slots = SlotTable::new(1);
        assert!(matches!(
            slots.mark_queued(1, 10, 64),
            Err(SubmitError::UnknownIndex(1))
        ));
        assert!(matches!(
            slots.mark_dequeued(7),
            Err(RetrieveError::UnknownIndex(7))
        ));
    }

    #[test]
    fn resubmission_reuses_the_stored_descriptor() {
        let mut slots = SlotTable::new(1);
        assert!(matches!(
            slots.dequeued_slot(0),
            Err(SubmitError::NeverSubmitted(0))
        ));

        slots.mark_queued(0, 42, 128).unwrap();
        assert!(matches!(
            slots.dequeued_slot(0),
            Err(SubmitError::AlreadyQueued(0))
        ));

        slots.mark_dequeued(0).unwrap();
        let slot = slots.dequeued_slot(0).unwrap();
        assert_eq!(slot.dmabuf, 42);
        assert_eq!(slot.length, 128);
    }
}
