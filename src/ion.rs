//! Safe wrappers for the legacy ION allocator ioctls, including the meson
//! heap's physical-address query.
//!
//! These follow the same conventions as the V4L2 wrappers in [`crate::ioctl`]:
//! each function takes the relevant input as parameters, manages the
//! underlying C structure itself, and returns the single piece of
//! information the caller is after. Classification of failures into the
//! pool's error taxonomy happens in [`crate::pool`], so the wrappers here
//! simply surface the raw `Errno`.

use bitflags::bitflags;
use nix::errno::Errno;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use crate::bindings;
use crate::bindings::ion_allocation_data;
use crate::bindings::ion_custom_data;
use crate::bindings::ion_fd_data;
use crate::bindings::ion_handle_data;
use crate::bindings::ion_user_handle_t;
use crate::bindings::meson_phys_data;

bitflags! {
    /// Heaps an allocation may be served from.
    #[derive(Clone, Copy, Debug)]
    pub struct HeapMask: u32 {
        /// Physically-contiguous reserved memory, as required by the video
        /// pipeline's DMA engines.
        const CARVEOUT = bindings::ION_HEAP_CARVEOUT_MASK;
    }
}

bitflags! {
    /// Allocation behavior flags.
    #[derive(Clone, Copy, Debug)]
    pub struct IonFlags: u32 {
        const CACHED = bindings::ION_FLAG_CACHED;
        const CACHED_NEEDS_SYNC = bindings::ION_FLAG_CACHED_NEEDS_SYNC;
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::ion_allocation_data;
    use crate::bindings::ion_custom_data;
    use crate::bindings::ion_fd_data;
    use crate::bindings::ion_handle_data;

    nix::ioctl_readwrite!(ion_ioc_alloc, b'I', 0, ion_allocation_data);
    nix::ioctl_readwrite!(ion_ioc_free, b'I', 1, ion_handle_data);
    nix::ioctl_readwrite!(ion_ioc_share, b'I', 4, ion_fd_data);
    nix::ioctl_readwrite!(ion_ioc_custom, b'I', 6, ion_custom_data);
}

/// Safe wrapper around the `ION_IOC_ALLOC` ioctl. Returns the kernel handle
/// of the new allocation.
pub fn alloc(
    fd: &impl AsRawFd,
    len: usize,
    heap_mask: HeapMask,
    flags: IonFlags,
) -> Result<ion_user_handle_t, Errno> {
    let mut allocation_data = ion_allocation_data {
        len,
        heap_id_mask: heap_mask.bits(),
        flags: flags.bits(),
        ..Default::default()
    };

    unsafe { ioctl::ion_ioc_alloc(fd.as_raw_fd(), &mut allocation_data) }?;

    Ok(allocation_data.handle)
}

/// Safe wrapper around the `ION_IOC_SHARE` ioctl. Exports `handle` as a
/// DMABUF usable across device boundaries.
pub fn share<R: FromRawFd>(fd: &impl AsRawFd, handle: ion_user_handle_t) -> Result<R, Errno> {
    let mut fd_data = ion_fd_data {
        handle,
        ..Default::default()
    };

    unsafe { ioctl::ion_ioc_share(fd.as_raw_fd(), &mut fd_data) }?;

    Ok(unsafe { R::from_raw_fd(fd_data.fd) })
}

/// Safe wrapper around the `ION_IOC_FREE` ioctl, releasing a kernel handle
/// obtained from [`alloc`].
pub fn free(fd: &impl AsRawFd, handle: ion_user_handle_t) -> Result<(), Errno> {
    let mut handle_data = ion_handle_data { handle };

    unsafe { ioctl::ion_ioc_free(fd.as_raw_fd(), &mut handle_data) }?;

    Ok(())
}

/// Queries the physical address backing the shared buffer `share_fd` through
/// the meson heap's `ION_IOC_CUSTOM` command. Returns the address and the
/// size of the contiguous region.
pub fn meson_phys_addr(fd: &impl AsRawFd, share_fd: RawFd) -> Result<(u32, u32), Errno> {
    let mut phys_data = meson_phys_data {
        handle: share_fd,
        ..Default::default()
    };

    let mut custom_data = ion_custom_data {
        cmd: bindings::ION_IOC_MESON_PHYS_ADDR,
        arg: &mut phys_data as *mut meson_phys_data as _,
    };

    unsafe { ioctl::ion_ioc_custom(fd.as_raw_fd(), &mut custom_data) }?;

    Ok((phys_data.phys_addr, phys_data.size))
}
