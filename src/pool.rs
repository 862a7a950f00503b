//! Buffer pool manager.
//!
//! Allocates the fixed set of physically-contiguous buffers the capture
//! device fills, out of the ION carveout heap. Each buffer is exported as a
//! DMABUF right after allocation and its physical address resolved once -
//! the address is immutable for the buffer's lifetime and resolving it is
//! expensive, so nothing should ever need to query it again per-frame.

use log::{debug, warn};
use nix::errno::Errno;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::bindings::ion_user_handle_t;
use crate::ion;
use crate::ion::HeapMask;
use crate::ion::IonFlags;

/// Default allocator device node.
pub const ION_DEVICE: &str = "/dev/ion";

#[derive(Debug, Error)]
#[error("failed to open ION device {path}: {source}")]
pub struct OpenError {
    path: PathBuf,
    source: io::Error,
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("ION allocation of {len} bytes failed: {source}")]
    Allocate { len: usize, source: Errno },
    #[error("exporting ION allocation as DMABUF failed: {0}")]
    Export(Errno),
    #[error("physical address resolution failed: {0}")]
    PhysAddr(Errno),
}

/// A physically-contiguous buffer allocated from ION.
///
/// The kernel-side allocation is released when this is dropped; the exported
/// DMABUF fd closes along with it.
pub struct IonBuffer {
    device: Arc<File>,
    handle: ion_user_handle_t,
    export: OwnedFd,
    length: usize,
    phys_addr: u32,
}

impl IonBuffer {
    /// Exported DMABUF fd, sharable with the capture device. The pool keeps
    /// ownership; the fd stays valid for as long as this buffer lives.
    pub fn export_fd(&self) -> RawFd {
        self.export.as_raw_fd()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Hardware-visible address of the buffer, resolved once at allocation
    /// time.
    pub fn phys_addr(&self) -> u32 {
        self.phys_addr
    }
}

impl Drop for IonBuffer {
    fn drop(&mut self) {
        if let Err(e) = ion::free(&*self.device, self.handle) {
            warn!("failed to free ION handle {}: {}", self.handle, e);
        }
    }
}

/// Something that can produce [`IonBuffer`]s. Implemented by
/// [`IonAllocator`] for the real device; tests substitute their own.
pub trait BufferAllocator {
    fn allocate(&self, len: usize) -> Result<IonBuffer, AllocError>;
}

/// Handle to the ION allocator device.
pub struct IonAllocator {
    device: Arc<File>,
}

impl IonAllocator {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| OpenError {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(IonAllocator {
            device: Arc::new(device),
        })
    }
}

impl BufferAllocator for IonAllocator {
    /// Allocates `len` cacheable bytes from the carveout heap, exports the
    /// allocation and resolves its physical address.
    fn allocate(&self, len: usize) -> Result<IonBuffer, AllocError> {
        let handle = ion::alloc(&*self.device, len, HeapMask::CARVEOUT, IonFlags::CACHED)
            .map_err(|source| AllocError::Allocate { len, source })?;

        let export: OwnedFd = match ion::share(&*self.device, handle) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = ion::free(&*self.device, handle);
                return Err(AllocError::Export(e));
            }
        };

        let (phys_addr, _size) = match ion::meson_phys_addr(&*self.device, export.as_raw_fd()) {
            Ok(r) => r,
            Err(e) => {
                let _ = ion::free(&*self.device, handle);
                return Err(AllocError::PhysAddr(e));
            }
        };

        debug!(
            "ION buffer: handle={} fd={} len={} phys=0x{:08x}",
            handle,
            export.as_raw_fd(),
            len,
            phys_addr
        );

        Ok(IonBuffer {
            device: Arc::clone(&self.device),
            handle,
            export,
            length: len,
            phys_addr,
        })
    }
}

/// The fixed table of capture buffers. Exactly `count` descriptors exist for
/// the lifetime of the session; their indices are the stable identifiers the
/// capture device's buffer protocol works with.
pub struct BufferPool {
    buffers: Vec<IonBuffer>,
}

impl BufferPool {
    /// Allocates `count` buffers of `len` bytes each. Any allocation failure
    /// aborts pool construction - the pipeline cannot run with a partial
    /// buffer table.
    pub fn allocate(
        allocator: &impl BufferAllocator,
        count: usize,
        len: usize,
    ) -> Result<Self, AllocError> {
        let mut buffers = Vec::with_capacity(count);
        for index in 0..count {
            let buffer = allocator.allocate(len)?;
            debug!("capture buffer {} at phys 0x{:08x}", index, buffer.phys_addr());
            buffers.push(buffer);
        }

        Ok(BufferPool { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&IonBuffer> {
        self.buffers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IonBuffer> {
        self.buffers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    /// Hands out fake descriptors with distinct physical addresses, failing
    /// at the `fail_at`-th allocation if requested.
    struct FakeAllocator {
        fail_at: Option<usize>,
        allocated: Cell<usize>,
    }

    impl FakeAllocator {
        fn new(fail_at: Option<usize>) -> Self {
            FakeAllocator {
                fail_at,
                allocated: Cell::new(0),
            }
        }

        fn placeholder_fd() -> File {
            File::open("/dev/null").unwrap()
        }
    }

    impl BufferAllocator for FakeAllocator {
        fn allocate(&self, len: usize) -> Result<IonBuffer, AllocError> {
            let index = self.allocated.get();
            if self.fail_at == Some(index) {
                return Err(AllocError::Allocate {
                    len,
                    source: Errno::ENOMEM,
                });
            }
            self.allocated.set(index + 1);

            Ok(IonBuffer {
                device: Arc::new(Self::placeholder_fd()),
                handle: index as ion_user_handle_t + 1,
                export: Self::placeholder_fd().into(),
                length: len,
                phys_addr: (0x1000_0000 + index * len) as u32,
            })
        }
    }

    const FRAME_LEN: usize = 1280 * 720 * 2;

    #[test]
    fn pool_holds_exactly_count_buffers() {
        let allocator = FakeAllocator::new(None);
        let pool = BufferPool::allocate(&allocator, 8, FRAME_LEN).unwrap();

        assert_eq!(pool.len(), 8);
        assert!(pool.get(7).is_some());
        assert!(pool.get(8).is_none());
        for buffer in pool.iter() {
            assert_eq!(buffer.length(), FRAME_LEN);
        }
    }

    #[test]
    fn physical_addresses_are_distinct_and_non_zero() {
        let allocator = FakeAllocator::new(None);
        let pool = BufferPool::allocate(&allocator, 8, FRAME_LEN).unwrap();

        let addresses: HashSet<u32> = pool.iter().map(|b| b.phys_addr()).collect();
        assert_eq!(addresses.len(), 8);
        assert!(!addresses.contains(&0));
    }

    #[test]
    fn allocation_failure_aborts_pool_construction() {
        // Fail on the 5th of 8 allocations.
        let allocator = FakeAllocator::new(Some(4));
        let result = BufferPool::allocate(&allocator, 8, FRAME_LEN);

        assert!(matches!(result, Err(AllocError::Allocate { .. })));
        assert_eq!(allocator.allocated.get(), 4);
    }
}
