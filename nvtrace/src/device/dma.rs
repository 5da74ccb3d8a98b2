//! DMA-capable data buffers
//!
//! Every buffer is at least [`DMA_BUFFER_SIZE`] bytes, a multiple of it, and
//! aligned to [`DMA_ALIGN`]. Controller memory is preferred; host memory is
//! the fallback and is pinned with `mlock`.

#![allow(unsafe_code)] // raw aligned allocation and mlock

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use log::{debug, warn};

use super::{DeviceSession, NamespaceInfo};
use crate::domain::DeviceError;

/// Buffer alignment required by the device
pub const DMA_ALIGN: usize = 4096;

/// Size of a single-page buffer
pub const DMA_BUFFER_SIZE: usize = 4096;

/// Where a buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Controller memory buffer
    ControllerMemory,
    /// Pinned host memory
    HostPinned,
}

impl fmt::Display for BufferOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferOrigin::ControllerMemory => f.write_str("controller memory"),
            BufferOrigin::HostPinned => f.write_str("host memory"),
        }
    }
}

/// Round `len` up to a whole number of buffer pages (at least one)
#[must_use]
pub fn dma_len(len: usize) -> usize {
    len.max(1).div_ceil(DMA_BUFFER_SIZE) * DMA_BUFFER_SIZE
}

/// An owned, zeroed, page-aligned buffer
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    origin: BufferOrigin,
    pinned: bool,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    fn alloc(len: usize, origin: BufferOrigin) -> Result<Self, DeviceError> {
        let len = dma_len(len);
        let layout = Layout::from_size_align(len, DMA_ALIGN)
            .map_err(|_| DeviceError::BufferAllocFailed { len })?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(DeviceError::BufferAllocFailed { len })?;
        Ok(Self { ptr, layout, origin, pinned: false })
    }

    /// Allocate pinned host memory
    ///
    /// # Errors
    /// Returns [`DeviceError::BufferAllocFailed`] if the allocation fails.
    /// Failure to pin is logged and the buffer is returned unpinned.
    pub fn alloc_host(len: usize) -> Result<Self, DeviceError> {
        let mut buf = Self::alloc(len, BufferOrigin::HostPinned)?;
        // SAFETY: ptr/len describe memory owned by buf.
        let rc = unsafe { libc::mlock(buf.ptr.as_ptr().cast(), buf.len()) };
        if rc == 0 {
            buf.pinned = true;
        } else {
            warn!(
                "Failed to pin {}-byte DMA buffer: {}",
                buf.len(),
                std::io::Error::last_os_error()
            );
        }
        Ok(buf)
    }

    /// Allocate a buffer tagged as controller memory, for sessions that back
    /// their controller memory buffer with host allocations
    ///
    /// # Errors
    /// Returns [`DeviceError::BufferAllocFailed`] if the allocation fails.
    pub fn alloc_controller(len: usize) -> Result<Self, DeviceError> {
        Self::alloc(len, BufferOrigin::ControllerMemory)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn origin(&self) -> BufferOrigin {
        self.origin
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is len() bytes, initialized, and owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("len", &self.len())
            .field("origin", &self.origin)
            .field("pinned", &self.pinned)
            .finish_non_exhaustive()
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with self.layout and is released exactly once.
        unsafe {
            if self.pinned {
                libc::munlock(self.ptr.as_ptr().cast(), self.len());
            }
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

/// Allocate a data buffer for a command on `ns`, preferring controller memory
///
/// # Errors
/// Returns [`DeviceError::BufferAllocFailed`] if neither controller nor host
/// memory is available.
pub fn alloc_dma_buffer<S: DeviceSession + ?Sized>(
    session: &S,
    ns: &NamespaceInfo,
    len: usize,
) -> Result<DmaBuffer, DeviceError> {
    let len = dma_len(len);
    if let Some(buf) = session.alloc_controller_buffer(ns, len) {
        if buf.len() >= len {
            debug!("Using {}-byte controller memory buffer", buf.len());
            return Ok(buf);
        }
        debug!("Controller memory buffer too small ({} < {len})", buf.len());
    }
    DmaBuffer::alloc_host(len)
}
