//! Hand-maintained subset of the kernel UAPI declarations the pump needs.
//!
//! Only the single-planar V4L2 structures used by the ionvideo capture path,
//! the legacy (pre-4.12) ION allocator interface with the meson heap
//! extension, and the amstream/amports decoder declarations from the
//! Amlogic 3.14-era kernels this board family runs are declared here.
//! Layouts follow the 64-bit kernel ABI.

#![allow(non_camel_case_types)]

use nix::libc::{c_ulong, timeval};

//
// videodev2.h
//

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_DMABUF: u32 = 4;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format__fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    // Forces the 8-byte alignment the kernel union gets from its
    // pointer-carrying members.
    _align: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format__fmt,
}

impl Default for v4l2_format {
    fn default() -> Self {
        // Safe because v4l2_format is a plain-old-data kernel structure.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer__m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut std::ffi::c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer__m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: u32,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // Safe because v4l2_buffer is a plain-old-data kernel structure.
        unsafe { std::mem::zeroed() }
    }
}

//
// ion.h (legacy staging interface)
//

pub type ion_user_handle_t = i32;

pub const ION_HEAP_TYPE_CARVEOUT: u32 = 2;
pub const ION_HEAP_CARVEOUT_MASK: u32 = 1 << ION_HEAP_TYPE_CARVEOUT;
pub const ION_FLAG_CACHED: u32 = 1;
pub const ION_FLAG_CACHED_NEEDS_SYNC: u32 = 2;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ion_allocation_data {
    pub len: usize,
    pub align: usize,
    pub heap_id_mask: u32,
    pub flags: u32,
    pub handle: ion_user_handle_t,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ion_fd_data {
    pub handle: ion_user_handle_t,
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ion_handle_data {
    pub handle: ion_user_handle_t,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ion_custom_data {
    pub cmd: u32,
    pub arg: c_ulong,
}

//
// meson_ion.h
//

/// Command understood by the meson heap through `ION_IOC_CUSTOM`.
pub const ION_IOC_MESON_PHYS_ADDR: u32 = 8;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct meson_phys_data {
    pub handle: i32,
    pub phys_addr: u32,
    pub size: u32,
}

//
// amports/vformat.h
//

/// `vformat_t` value for an MJPEG elementary stream.
pub const VFORMAT_MJPEG: u32 = 3;
/// `vdec_type_t` value selecting the MJPEG decoder firmware.
pub const VIDEO_DEC_FORMAT_MJPEG: u32 = 5;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct dec_sysinfo_t {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub rate: u32,
    pub extra: u32,
    pub status: u32,
    pub ratio: u32,
    /// Declared `void *` in the kernel header; the decoder reads flag bits
    /// out of the pointer value itself.
    pub param: usize,
    pub ratio64: u64,
}
