//! Safe wrapper for the `VIDIOC_DQBUF` ioctl.
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings::v4l2_buffer;
use crate::MemoryType;
use crate::QueueType;

/// Implementors can receive the result from the `dqbuf` ioctl.
pub trait DqBuf: Sized {
    fn from_v4l2_buffer(v4l2_buf: &v4l2_buffer) -> Self;
}

/// Useful for the case where we are only interested in the index of a
/// dequeued buffer.
impl DqBuf for u32 {
    fn from_v4l2_buffer(v4l2_buf: &v4l2_buffer) -> Self {
        v4l2_buf.index
    }
}

/// Information about a dequeued buffer. Safe variant of the fields of
/// `struct v4l2_buffer` that the driver fills on dequeue.
#[derive(Debug, Clone, Copy)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytesused: u32,
    pub sequence: u32,
}

impl DqBuf for DequeuedBuffer {
    fn from_v4l2_buffer(v4l2_buf: &v4l2_buffer) -> Self {
        DequeuedBuffer {
            index: v4l2_buf.index,
            bytesused: v4l2_buf.bytesused,
            sequence: v4l2_buf.sequence,
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum DqBufError {
    /// No buffer was ready for dequeue. This is the expected common case on
    /// a non-blocking device, not a device failure.
    #[error("no buffer ready for dequeue")]
    NotReady,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<Errno> for DqBufError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EAGAIN => Self::NotReady,
            e => Self::IoctlError(e),
        }
    }
}

impl From<DqBufError> for Errno {
    fn from(err: DqBufError) -> Self {
        match err {
            DqBufError::NotReady => Errno::EAGAIN,
            DqBufError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_DQBUF` ioctl.
pub fn dqbuf<T: DqBuf>(fd: &impl AsRawFd, queue: QueueType) -> Result<T, DqBufError> {
    let mut v4l2_buf = v4l2_buffer {
        type_: queue as u32,
        memory: MemoryType::DmaBuf as u32,
        ..Default::default()
    };

    unsafe { ioctl::vidioc_dqbuf(fd.as_raw_fd(), &mut v4l2_buf) }?;

    Ok(T::from_v4l2_buffer(&v4l2_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeued_buffer_from_v4l2_buffer() {
        let v4l2_buf = v4l2_buffer {
            index: 3,
            bytesused: 0x1000,
            sequence: 42,
            ..Default::default()
        };

        let dequeued = DequeuedBuffer::from_v4l2_buffer(&v4l2_buf);
        assert_eq!(dequeued.index, 3);
        assert_eq!(dequeued.bytesused, 0x1000);
        assert_eq!(dequeued.sequence, 42);
        assert_eq!(u32::from_v4l2_buffer(&v4l2_buf), 3);
    }

    #[test]
    fn eagain_is_not_ready() {
        assert!(matches!(DqBufError::from(Errno::EAGAIN), DqBufError::NotReady));
        assert!(matches!(
            DqBufError::from(Errno::EIO),
            DqBufError::IoctlError(Errno::EIO)
        ));
    }
}
