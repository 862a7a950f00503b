//! Safe wrapper for the `VIDIOC_S_FMT` ioctl.
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;
use crate::bindings::v4l2_format;
use crate::bindings::v4l2_pix_format;
use crate::PixelFormat;
use crate::QueueType;

/// Negotiated capture format. Safe variant of `struct v4l2_pix_format` with
/// the fields the pump cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Width of the image in pixels.
    pub width: u32,
    /// Height of the image in pixels.
    pub height: u32,
    /// Format each pixel is encoded in.
    pub pixelformat: PixelFormat,
    /// Size of a frame as reported by the driver, if it reports one.
    pub sizeimage: u32,
}

impl From<v4l2_format> for Format {
    fn from(fmt: v4l2_format) -> Self {
        // Safe because the driver filled the single-planar `pix` member for
        // the VIDEO_CAPTURE queue type we submitted.
        let pix = unsafe { fmt.fmt.pix };
        Format {
            width: pix.width,
            height: pix.height,
            pixelformat: PixelFormat::from(pix.pixelformat),
            sizeimage: pix.sizeimage,
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_format;
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
}

#[derive(Debug, Error)]
pub enum SFmtError {
    #[error("invalid or unsupported format requested")]
    Invalid,
    #[error("device currently busy")]
    Busy,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<SFmtError> for Errno {
    fn from(err: SFmtError) -> Self {
        match err {
            SFmtError::Invalid => Errno::EINVAL,
            SFmtError::Busy => Errno::EBUSY,
            SFmtError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `VIDIOC_S_FMT` ioctl. Returns the format actually
/// applied by the driver, which may differ from the requested one.
pub fn s_fmt(
    fd: &impl AsRawFd,
    queue: QueueType,
    width: u32,
    height: u32,
    pixelformat: PixelFormat,
) -> Result<Format, SFmtError> {
    let mut fmt = v4l2_format {
        type_: queue as u32,
        ..Default::default()
    };
    fmt.fmt.pix = v4l2_pix_format {
        width,
        height,
        pixelformat: pixelformat.to_u32(),
        ..Default::default()
    };

    match unsafe { ioctl::vidioc_s_fmt(fd.as_raw_fd(), &mut fmt) } {
        Ok(_) => Ok(Format::from(fmt)),
        Err(Errno::EINVAL) => Err(SFmtError::Invalid),
        Err(Errno::EBUSY) => Err(SFmtError::Busy),
        Err(e) => Err(SFmtError::IoctlError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_v4l2_format() {
        let mut fmt = v4l2_format {
            type_: bindings::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        fmt.fmt.pix = v4l2_pix_format {
            width: 1280,
            height: 720,
            pixelformat: PixelFormat::from_fourcc(b"NV12").to_u32(),
            sizeimage: 1280 * 720 * 2,
            ..Default::default()
        };

        let format = Format::from(fmt);
        assert_eq!(format.width, 1280);
        assert_eq!(format.height, 720);
        assert_eq!(format.pixelformat, PixelFormat::from_fourcc(b"NV12"));
        assert_eq!(format.sizeimage, 1280 * 720 * 2);
    }
}
