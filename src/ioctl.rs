//! Thin, safe wrappers over the V4L2 ioctls driven on the ionvideo capture
//! node.
//!
//! Each wrapper takes the relevant input as parameters rather than the whole
//! input/output structure, manages the underlying C structure itself, and
//! returns a validated, safe variant of the driver's answer. Every ioctl has
//! its own error type so that situations where the ioctl returned non-zero
//! without being an actual error (like `VIDIOC_DQBUF` returning `EAGAIN`
//! when no buffer is ready) can be told apart from device failures.
//!
//! Only the single-planar, DMABUF-memory subset used by the ionvideo device
//! is covered.

mod dqbuf;
mod qbuf;
mod reqbufs;
mod s_fmt;
mod streamon;

pub use dqbuf::*;
pub use qbuf::*;
pub use reqbufs::*;
pub use s_fmt::*;
pub use streamon::*;
