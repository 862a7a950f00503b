//! amstream elementary-stream decoder session.
//!
//! The hardware decoder is fed through the amstream character device: the
//! session is configured with a handful of ioctls (stream format, system
//! info, port init) and then consumes the compressed stream through plain
//! `write(2)` calls on the same fd. Writes may accept any number of bytes
//! per call, including zero; completing a frame is the feeder's business
//! (see [`crate::feeder`]).

use bitflags::bitflags;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc::c_int;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bindings;
use crate::bindings::dec_sysinfo_t;

/// Elementary-stream video device the compressed payload is written to.
pub const VIDEO_ES_DEVICE: &str = "/dev/amstream_vbuf";
/// Control device for the video output path.
pub const AMVIDEO_DEVICE: &str = "/dev/amvideo";

/// PTS clock rate of the amports subsystem, in ticks per second.
const PTS_FREQ: u32 = 96000;

bitflags! {
    /// Synchronization flags handed to the decoder through
    /// `am_sysinfo.param`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SyncFlags: usize {
        const EXTERNAL_PTS = 0x01;
        const SYNC_OUTSIDE = 0x02;
        const USE_IDR_FRAMERATE = 0x04;
        const UCODE_IP_ONLY_PARAM = 0x08;
        const MAX_REFER_BUF = 0x10;
        const ERROR_RECOVERY_MODE_IN = 0x20;
    }
}

/// Compressed formats the decoder session supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mjpeg,
}

impl VideoFormat {
    /// `vformat_t` value selecting the stream parser.
    fn vformat(self) -> u32 {
        match self {
            VideoFormat::Mjpeg => bindings::VFORMAT_MJPEG,
        }
    }

    /// `vdec_type_t` value selecting the decoder firmware.
    fn dec_format(self) -> u32 {
        match self {
            VideoFormat::Mjpeg => bindings::VIDEO_DEC_FORMAT_MJPEG,
        }
    }
}

/// Decoder session configuration.
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sync: SyncFlags,
}

impl CodecConfig {
    /// Frame duration in PTS ticks, which is what `am_sysinfo.rate` expects.
    fn pts_rate(&self) -> u32 {
        PTS_FREQ / self.fps
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::dec_sysinfo_t;
    use nix::libc::c_int;

    nix::ioctl_write_int!(amstream_vformat, b'S', 0x04);
    // Declared `_IOW('S', 0x30, int)` by the kernel header even though the
    // driver reads a dec_sysinfo_t through the pointer.
    nix::ioctl_write_ptr_bad!(
        amstream_sysinfo,
        nix::request_code_write!(b'S', 0x30, std::mem::size_of::<c_int>()),
        dec_sysinfo_t
    );
    nix::ioctl_none!(amstream_port_init, b'S', 0x32);
    nix::ioctl_write_int!(amvideo_set_freerun_mode, b'S', 0x5a);
    nix::ioctl_read!(amvideo_get_freerun_mode, b'S', 0x5b, c_int);
}

#[derive(Debug, Error)]
pub enum CodecInitError {
    #[error("failed to open decoder device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("setting stream format failed: {0}")]
    SetFormat(Errno),
    #[error("pushing decoder system info failed: {0}")]
    SysInfo(Errno),
    #[error("stream port init failed: {0}")]
    PortInit(Errno),
}

#[derive(Debug, Error)]
#[error("codec write failed: {0}")]
pub struct WriteError(pub Errno);

/// Something the compressed payload can be written into. Implemented by
/// [`CodecDevice`] for the real decoder; tests substitute their own.
///
/// A call may accept any number of bytes; `Ok(0)` means no progress was
/// made this call and the caller should retry the same data.
pub trait CodecSink {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError>;
}

/// An open, configured decoder session.
pub struct CodecDevice {
    stream: File,
}

impl CodecDevice {
    /// Opens the elementary-stream device at `path` and configures the
    /// decoder for `config`. All failures here are fatal for the session.
    pub fn open(path: &Path, config: &CodecConfig) -> Result<Self, CodecInitError> {
        let stream = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| CodecInitError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fd = stream.as_raw_fd();

        unsafe { ioctl::amstream_vformat(fd, config.format.vformat() as nix::libc::c_ulong) }
            .map_err(CodecInitError::SetFormat)?;

        let sysinfo = dec_sysinfo_t {
            format: config.format.dec_format(),
            width: config.width,
            height: config.height,
            rate: config.pts_rate(),
            param: config.sync.bits(),
            ..Default::default()
        };
        unsafe { ioctl::amstream_sysinfo(fd, &sysinfo) }.map_err(CodecInitError::SysInfo)?;

        unsafe { ioctl::amstream_port_init(fd) }.map_err(CodecInitError::PortInit)?;

        debug!(
            "decoder session: {:?} {}x{} rate {} sync {:?}",
            config.format,
            config.width,
            config.height,
            config.pts_rate(),
            config.sync
        );

        Ok(CodecDevice { stream })
    }
}

impl CodecSink for CodecDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        match nix::unistd::write(&self.stream, data) {
            Ok(written) => Ok(written),
            // Transient conditions: no progress this call, retry.
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(0),
            Err(e) => Err(WriteError(e)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FreerunError {
    #[error("failed to open video control device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("setting freerun mode failed: {0}")]
    Set(Errno),
}

/// Toggles the video output's freerun mode, which lets decoded frames flow
/// without AV-sync gating. Must be enabled before the decoder session is
/// opened for the loopback pipeline to run at its own cadence.
pub fn set_freerun(path: &Path, enabled: bool) -> Result<(), FreerunError> {
    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| FreerunError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let fd = device.as_raw_fd();

    unsafe { ioctl::amvideo_set_freerun_mode(fd, enabled as nix::libc::c_ulong) }
        .map_err(FreerunError::Set)?;

    let mut mode: c_int = 0;
    match unsafe { ioctl::amvideo_get_freerun_mode(fd, &mut mode) } {
        Ok(_) => debug!("freerun mode: {}", mode),
        Err(e) => warn!("could not read back freerun mode: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_rate_is_frame_duration_in_ticks() {
        let config = CodecConfig {
            format: VideoFormat::Mjpeg,
            width: 1280,
            height: 720,
            fps: 60,
            sync: SyncFlags::EXTERNAL_PTS | SyncFlags::SYNC_OUTSIDE,
        };
        assert_eq!(config.pts_rate(), 1600);
    }

    #[test]
    fn sync_flags_match_the_decoder_abi() {
        let sync = SyncFlags::EXTERNAL_PTS | SyncFlags::SYNC_OUTSIDE;
        assert_eq!(sync.bits(), 0x03);
    }
}
