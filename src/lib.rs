//! Frame-pump core for the Amlogic ionvideo capture path.
//!
//! This crate drives the hardware loop used by the `ionpump` binary: a
//! pre-encoded MJPEG frame is pushed into the amstream hardware decoder at a
//! fixed cadence while the decoded output, routed through the `ionvideo`
//! V4L2 device, is continuously drained into ION-allocated DMABUF buffers
//! and requeued.
//!
//! The crate is split in two levels:
//!
//! * Thin, safe wrappers over the device interfaces: the [`ioctl`] module
//!   covers the V4L2 calls driven on the capture node, [`ion`] the legacy
//!   ION allocator, and [`codec`] the amstream elementary-stream decoder.
//! * The pump core built on top of them: [`pool`] (buffer allocation and
//!   ownership), [`queue`] (the submit/retrieve ring protocol), [`feeder`]
//!   (the paced decoder feed) and [`pump`] (the drain/requeue loop).
//!
//! The device seams ([`pool::BufferAllocator`], [`pump::FrameSource`],
//! [`codec::CodecSink`]) are traits so that the pump core can be exercised
//! without the Amlogic hardware.

#[doc(hidden)]
pub mod bindings;
pub mod clock;
pub mod codec;
pub mod feeder;
pub mod ioctl;
pub mod ion;
pub mod pool;
pub mod pump;
pub mod queue;
pub mod vfm;

use std::fmt;

/// Type of the single V4L2 queue this crate drives. The ionvideo device
/// only exposes a single-planar capture queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum QueueType {
    VideoCapture = bindings::V4L2_BUF_TYPE_VIDEO_CAPTURE,
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Memory type of the buffers handed to the capture queue. All buffers are
/// allocated out of ION and imported through their exported DMABUF fd.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryType {
    DmaBuf = bindings::V4L2_MEMORY_DMABUF,
}

/// A Fourcc pixel format, used to pass formats to V4L2. It can be converted
/// back and forth from a 32-bit integer, or a 4-bytes string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PixelFormat(u32);

impl PixelFormat {
    pub const fn from_u32(v: u32) -> Self {
        Self(v)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn from_fourcc(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }

    pub const fn to_fourcc(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

/// Converts a Fourcc in 32-bit integer format (like the ones found in V4L2
/// structures) into the matching pixel format.
///
/// # Examples
///
/// ```
/// # use ionpump::PixelFormat;
/// // Fourcc representation of NV12.
/// let nv12 = u32::from_le(0x3231564e);
/// let f = PixelFormat::from(nv12);
/// assert_eq!(u32::from(f), nv12);
/// ```
impl From<u32> for PixelFormat {
    fn from(i: u32) -> Self {
        Self::from_u32(i)
    }
}

impl From<PixelFormat> for u32 {
    fn from(format: PixelFormat) -> Self {
        format.to_u32()
    }
}

/// Simple way to convert a string litteral (e.g. b"NV12") into a pixel
/// format that can be passed to V4L2.
///
/// # Examples
///
/// ```
/// # use ionpump::PixelFormat;
/// let nv12 = b"NV12";
/// let f = PixelFormat::from(nv12);
/// assert_eq!(&<[u8; 4]>::from(f), nv12);
/// ```
impl From<&[u8; 4]> for PixelFormat {
    fn from(n: &[u8; 4]) -> Self {
        Self::from_fourcc(n)
    }
}

impl From<PixelFormat> for [u8; 4] {
    fn from(format: PixelFormat) -> Self {
        format.to_fourcc()
    }
}

/// Produces a debug string for this PixelFormat, including its hexadecimal
/// and string representation.
///
/// # Examples
///
/// ```
/// # use ionpump::PixelFormat;
/// // Fourcc representation of NV12.
/// let nv12 = u32::from_le(0x3231564e);
/// let f = PixelFormat::from(nv12);
/// assert_eq!(format!("{:?}", f), "0x3231564e (NV12)");
/// ```
impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

/// Produces a displayable form of this PixelFormat.
///
/// # Examples
///
/// ```
/// # use ionpump::PixelFormat;
/// // Fourcc representation of NV12.
/// let nv12 = u32::from_le(0x3231564e);
/// let f = PixelFormat::from(nv12);
/// assert_eq!(f.to_string(), "NV12");
/// ```
impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc = self
            .0
            .to_le_bytes()
            .iter()
            .map(|&x| x as char)
            .collect::<String>();
        f.write_str(fourcc.as_str())
    }
}
