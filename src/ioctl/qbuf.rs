//! Safe wrapper for the `VIDIOC_QBUF` ioctl, restricted to single-planar
//! DMABUF buffers as used by the ionvideo device.
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use thiserror::Error;

use crate::bindings::v4l2_buffer;
use crate::MemoryType;
use crate::QueueType;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum QBufError {
    #[error("invalid queue, buffer index or memory type")]
    Invalid,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<QBufError> for Errno {
    fn from(err: QBufError) -> Self {
        match err {
            QBufError::Invalid => Errno::EINVAL,
            QBufError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_QBUF` ioctl, queueing buffer `index`
/// backed by the DMABUF `dmabuf_fd`.
///
/// The caller must guarantee that `dmabuf_fd` stays open and is not accessed
/// from user-space until the buffer is returned by `dqbuf` or the stream is
/// stopped.
pub fn qbuf_dmabuf(
    fd: &impl AsRawFd,
    queue: QueueType,
    index: usize,
    dmabuf_fd: RawFd,
    length: u32,
) -> Result<(), QBufError> {
    let mut v4l2_buf = v4l2_buffer {
        index: index as u32,
        type_: queue as u32,
        memory: MemoryType::DmaBuf as u32,
        length,
        ..Default::default()
    };
    v4l2_buf.m.fd = dmabuf_fd;

    match unsafe { ioctl::vidioc_qbuf(fd.as_raw_fd(), &mut v4l2_buf) } {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) => Err(QBufError::Invalid),
        Err(e) => Err(QBufError::IoctlError(e)),
    }
}
