//! The rewired memory substrate (spec §4.1): a reservation of virtual
//! address space backed by a shared physical-memory file descriptor, with a
//! primitive to swap the physical backing of any two in-range extents
//! without copying data.
//!
//! Grounded in `rewired_memory.{hpp,cpp}` of the original source: an
//! anonymous `memfd_create`-backed shared mapping, `ftruncate`d to the
//! requested physical size and `mmap`ped at an arbitrary address for the
//! full virtual reservation, so that touching memory past the allocated
//! extents raises `SIGBUS` rather than silently succeeding.

pub mod pool;

use crate::error::{PmaError, Result};
use log::{debug, trace, warn};
use std::os::unix::io::RawFd;

/// A single large section of rewired memory, split into fixed-size extents.
/// Extents within the reservation can be rewired: the physical pages backing
/// one virtual extent are exchanged with those backing another, via two
/// fixed-address `mmap` calls, without moving any bytes.
pub struct RewiredMemory {
    page_size: usize,
    pages_per_extent: usize,
    start_address: *mut u8,
    fd: RawFd,
    /// `translation[i]` is the physical extent currently backing virtual
    /// extent `i`.
    translation: Vec<u32>,
    max_memory: usize,
}

// The struct owns a unique mapping and fd; it is safe to move across
// threads (though the crate's concurrency model is single-threaded, see
// spec §5) as long as access is externally synchronized.
unsafe impl Send for RewiredMemory {}

static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl RewiredMemory {
    /// Reserve `max_memory` bytes of virtual address space and back the
    /// first `initial_extents` extents with physical pages.
    pub fn new(
        pages_per_extent: usize,
        initial_extents: usize,
        max_memory: usize,
        use_huge_pages: bool,
    ) -> Result<Self> {
        if pages_per_extent == 0 {
            return Err(PmaError::invalid("pages_per_extent must be > 0"));
        }
        if initial_extents == 0 {
            return Err(PmaError::invalid("initial_extents must be > 0"));
        }
        let page_size = if use_huge_pages {
            crate::config::HUGE_PAGE_SIZE
        } else {
            crate::config::DEFAULT_PAGE_SIZE
        };
        let extent_size = page_size * pages_per_extent;
        let physical_size = extent_size
            .checked_mul(initial_extents)
            .ok_or_else(|| PmaError::invalid("initial extent count overflows"))?;
        if physical_size > max_memory {
            return Err(PmaError::CapacityExceeded(format!(
                "cannot allocate {} bytes: max_memory is {} bytes",
                physical_size, max_memory
            )));
        }

        let id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let fd = create_anonymous_fd(id, use_huge_pages)?;

        if unsafe { libc::ftruncate(fd, physical_size as libc::off_t) } != 0 {
            let err = PmaError::rewiring(format!(
                "ftruncate to {} bytes failed",
                physical_size
            ));
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mmap_ret = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                max_memory,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mmap_ret == libc::MAP_FAILED {
            let err = PmaError::rewiring(format!("mmap of {} bytes failed", max_memory));
            unsafe { libc::close(fd) };
            return Err(err);
        }

        debug!(
            "RewiredMemory::new pages_per_extent={} extent_size={} initial_extents={} max_memory={}",
            pages_per_extent, extent_size, initial_extents, max_memory
        );

        Ok(RewiredMemory {
            page_size,
            pages_per_extent,
            start_address: mmap_ret as *mut u8,
            fd,
            translation: (0..initial_extents as u32).collect(),
            max_memory,
        })
    }

    pub fn start_address(&self) -> *mut u8 {
        self.start_address
    }

    pub fn extent_size(&self) -> usize {
        self.page_size * self.pages_per_extent
    }

    pub fn allocated_extents(&self) -> usize {
        self.translation.len()
    }

    pub fn allocated_memory_size(&self) -> usize {
        self.extent_size() * self.allocated_extents()
    }

    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// A typed view of the `i`-th extent's byte range as `[i64]` slots.
    ///
    /// # Safety
    /// The caller must not hold overlapping mutable views, and `i` must be
    /// an allocated extent.
    pub unsafe fn extent_slots(&self, extent_index: usize) -> &mut [i64] {
        debug_assert!(extent_index < self.allocated_extents());
        let byte_offset = extent_index * self.extent_size();
        let ptr = self.start_address.add(byte_offset) as *mut i64;
        std::slice::from_raw_parts_mut(ptr, self.extent_size() / 8)
    }

    fn validate_address(&self, addr: usize) -> Result<usize> {
        let base = self.start_address as usize;
        let extent_size = self.extent_size();
        if addr < base || addr >= base + self.allocated_memory_size() {
            return Err(PmaError::rewiring(format!(
                "address {:#x} is not within the mapped range [{:#x}, {:#x})",
                addr,
                base,
                base + self.allocated_memory_size()
            )));
        }
        if (addr - base) % extent_size != 0 {
            return Err(PmaError::rewiring(format!(
                "address {:#x} is not aligned to the extent size {}",
                addr, extent_size
            )));
        }
        Ok((addr - base) / extent_size)
    }

    /// Grow the reservation's physical backing by `k` extents, appended
    /// with an identity mapping.
    pub fn extend(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Ok(());
        }
        let new_total = self.allocated_extents() + k;
        let new_size = new_total
            .checked_mul(self.extent_size())
            .ok_or_else(|| PmaError::invalid("extent count overflows"))?;
        if new_size > self.max_memory {
            return Err(PmaError::CapacityExceeded(format!(
                "extending by {} extents would reach {} bytes, exceeding max_memory {} bytes",
                k, new_size, self.max_memory
            )));
        }
        if unsafe { libc::ftruncate(self.fd, new_size as libc::off_t) } != 0 {
            return Err(PmaError::rewiring(format!(
                "ftruncate to {} bytes failed",
                new_size
            )));
        }
        let start = self.translation.len() as u32;
        self.translation.extend(start..start + k as u32);
        trace!("RewiredMemory::extend by {} extents, now {}", k, new_total);
        Ok(())
    }

    /// Exchange the physical backing of the extents starting at `addr_a`
    /// and `addr_b`. Both addresses must be extent-aligned and in range,
    /// and must differ. On failure the translation table is left
    /// unchanged.
    pub fn swap(&mut self, addr_a: usize, addr_b: usize) -> Result<()> {
        if addr_a == addr_b {
            return Err(PmaError::rewiring(format!(
                "addr_a and addr_b are the same address: {:#x}",
                addr_a
            )));
        }
        let i = self.validate_address(addr_a)?;
        let j = self.validate_address(addr_b)?;
        let p = self.translation[i];
        let q = self.translation[j];
        let extent_size = self.extent_size();

        let ret_a = unsafe {
            libc::mmap(
                addr_a as *mut libc::c_void,
                extent_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                self.fd,
                (q as usize * extent_size) as libc::off_t,
            )
        };
        if ret_a == libc::MAP_FAILED {
            return Err(PmaError::rewiring(format!(
                "first rewiring failed for address {:#x}",
                addr_a
            )));
        }
        let ret_b = unsafe {
            libc::mmap(
                addr_b as *mut libc::c_void,
                extent_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                self.fd,
                (p as usize * extent_size) as libc::off_t,
            )
        };
        if ret_b == libc::MAP_FAILED {
            // The first rewiring already committed addr_a to physical `q`.
            // Leave the table reflecting reality rather than lie about it;
            // this is a fatal condition for the caller to surface.
            return Err(PmaError::rewiring(format!(
                "second rewiring failed for address {:#x} (first rewiring already applied)",
                addr_b
            )));
        }

        self.translation[i] = q;
        self.translation[j] = p;
        trace!("RewiredMemory::swap extent {} <-> extent {}", i, j);
        Ok(())
    }
}

impl Drop for RewiredMemory {
    fn drop(&mut self) {
        if !self.start_address.is_null() {
            let rc = unsafe {
                libc::munmap(self.start_address as *mut libc::c_void, self.max_memory)
            };
            if rc != 0 {
                warn!(
                    "RewiredMemory::drop munmap failed: errno {}",
                    errno::errno()
                );
            }
        }
        if self.fd >= 0 {
            if unsafe { libc::close(self.fd) } != 0 {
                warn!("RewiredMemory::drop close(fd) failed: errno {}", errno::errno());
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn create_anonymous_fd(id: u64, use_huge_pages: bool) -> Result<RawFd> {
    let name = std::ffi::CString::new(format!("rewired_memory_{}", id)).unwrap();
    let flags = if use_huge_pages { libc::MFD_HUGETLB } else { 0 };
    let fd = unsafe { libc::memfd_create(name.as_ptr(), flags as libc::c_uint) };
    if fd < 0 {
        return Err(PmaError::rewiring("memfd_create failed"));
    }
    Ok(fd)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn create_anonymous_fd(id: u64, _use_huge_pages: bool) -> Result<RawFd> {
    // No memfd_create on this platform: fall back to a named POSIX shared
    // memory object that is unlinked immediately, so the fd behaves like an
    // anonymous handle to the caller.
    let name = std::ffi::CString::new(format!("/pma-rewired-{}-{}", std::process::id(), id)).unwrap();
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
            0o600,
        )
    };
    if fd < 0 {
        return Err(PmaError::rewiring("shm_open failed"));
    }
    unsafe { libc::shm_unlink(name.as_ptr()) };
    Ok(fd)
}
