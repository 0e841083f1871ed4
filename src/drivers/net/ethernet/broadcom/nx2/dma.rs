//! DMA buffer management
//!
//! Descriptor rings, the status block, the statistics block and the 5709's
//! host context pages are long-lived coherent regions. Their device address
//! never changes while allocated, and they are returned to the host only
//! after the controller has been reset or shut down, so hardware can no longer
//! reference them.
//!
//! All multi-byte accesses go through explicit little-endian encode/decode at
//! byte offsets; nothing is overlaid on DMA memory as a Rust struct.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// Host page size used for every coherent allocation
pub const DMA_PAGE_SIZE: usize = 4096;

/// A coherent region as handed out by the host
#[derive(Debug)]
pub struct DmaRegion {
    pub virt: NonNull<u8>,
    pub bus_addr: u64,
    pub size: usize,
    pub align: usize,
}

/// Host primitive for physically contiguous, cache-coherent memory
pub trait DmaAllocator {
    /// Allocate zeroed memory. `align` is a power of two.
    fn alloc_coherent(&self, size: usize, align: usize) -> Option<DmaRegion>;

    /// # Safety
    ///
    /// `region` must come from `alloc_coherent` on this allocator and the
    /// device must no longer reference it.
    unsafe fn free_coherent(&self, region: DmaRegion);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    AllocationFailed { size: usize },
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmaError::AllocationFailed { size } => {
                write!(f, "coherent allocation of {} bytes failed", size)
            }
        }
    }
}

/// Owned coherent buffer shared with the device
pub struct DmaBuffer {
    region: DmaRegion,
}

// SAFETY: the region is plain memory owned by this value; every access is a
// volatile byte copy, and ring state that decides who may touch which bytes
// is serialized by the controller's locks.
unsafe impl Send for DmaBuffer {}
// SAFETY: as above
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    pub fn allocate<A: DmaAllocator + ?Sized>(
        allocator: &A,
        size: usize,
    ) -> Result<Self, DmaError> {
        let region = allocator
            .alloc_coherent(size, DMA_PAGE_SIZE)
            .ok_or(DmaError::AllocationFailed { size })?;
        let buffer = Self { region };
        buffer.zero();
        Ok(buffer)
    }

    /// Return the memory to the host.
    ///
    /// # Safety
    ///
    /// The device must no longer reference this buffer.
    pub unsafe fn release<A: DmaAllocator + ?Sized>(self, allocator: &A) {
        // SAFETY: caller guarantees the device is done with the region
        unsafe { allocator.free_coherent(self.region) };
    }

    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.region.bus_addr
    }

    #[inline]
    pub fn bus_addr_hi(&self) -> u32 {
        (self.region.bus_addr >> 32) as u32
    }

    #[inline]
    pub fn bus_addr_lo(&self) -> u32 {
        self.region.bus_addr as u32
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.region.size
    }

    pub fn zero(&self) {
        // SAFETY: region is valid for `size` bytes while self is alive
        unsafe { core::ptr::write_bytes(self.region.virt.as_ptr(), 0, self.region.size) };
    }

    /// Panics unless `width` bytes at `offset` lie inside the buffer
    #[inline]
    fn ptr_at(&self, offset: usize, width: usize) -> *mut u8 {
        let in_bounds = offset
            .checked_add(width)
            .is_some_and(|end| end <= self.region.size);
        assert!(
            in_bounds,
            "DMA access of {} bytes at {:#x} outside {:#x} byte buffer",
            width, offset, self.region.size
        );
        // SAFETY: offset + width is within the region, checked above
        unsafe { self.region.virt.as_ptr().add(offset) }
    }

    pub fn read16(&self, offset: usize) -> u16 {
        let mut bytes = [0u8; 2];
        for (i, byte) in bytes.iter_mut().enumerate() {
            // SAFETY: see ptr_at; volatile because the device writes this memory
            *byte = unsafe { core::ptr::read_volatile(self.ptr_at(offset, 2).add(i)) };
        }
        u16::from_le_bytes(bytes)
    }

    pub fn read32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            // SAFETY: see ptr_at; volatile because the device writes this memory
            *byte = unsafe { core::ptr::read_volatile(self.ptr_at(offset, 4).add(i)) };
        }
        u32::from_le_bytes(bytes)
    }

    pub fn write16(&self, offset: usize, value: u16) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            // SAFETY: see ptr_at
            unsafe { core::ptr::write_volatile(self.ptr_at(offset, 2).add(i), byte) };
        }
    }

    pub fn write32(&self, offset: usize, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            // SAFETY: see ptr_at
            unsafe { core::ptr::write_volatile(self.ptr_at(offset, 4).add(i), byte) };
        }
    }

    /// Copy `len` bytes starting at `offset` out of the buffer
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        let base = self.ptr_at(offset, out.len());
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: ptr_at checked the whole range
            *byte = unsafe { core::ptr::read_volatile(base.add(i)) };
        }
    }
}

// ============================================================================
// Identity-Mapped Allocator
// ============================================================================

/// Coherent memory from the global allocator, with bus address equal to the
/// virtual address. Suitable for identity-mapped kernels without an IOMMU
/// on cache-coherent platforms.
pub struct IdentityDma;

impl DmaAllocator for IdentityDma {
    fn alloc_coherent(&self, size: usize, align: usize) -> Option<DmaRegion> {
        let layout = Layout::from_size_align(size, align).ok()?;
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let virt = NonNull::new(ptr)?;
        Some(DmaRegion {
            virt,
            bus_addr: ptr as u64,
            size,
            align,
        })
    }

    unsafe fn free_coherent(&self, region: DmaRegion) {
        if let Ok(layout) = Layout::from_size_align(region.size, region.align) {
            // SAFETY: region came from alloc_coherent with this layout
            unsafe { alloc::alloc::dealloc(region.virt.as_ptr(), layout) };
        }
    }
}
