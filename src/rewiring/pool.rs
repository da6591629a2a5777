//! The buffered rewiring pool (spec §4.2): wraps the substrate with a free
//! list of scratch "buffer" extents located past the user-visible end of
//! the reservation, used during spreads so a destination extent can be
//! rewired while its previous content is still being read out of.
//!
//! Grounded in `buffered_rewired_memory.{hpp,cpp}` of the original source.
//! Addresses are tracked as extent indices (Design Notes: "replace raw
//! pointer arithmetic with explicit index arithmetic"), converted to
//! virtual addresses only at the boundary with [`RewiredMemory`].

use super::RewiredMemory;
use crate::error::{PmaError, Result};
use log::{debug, trace};
use std::collections::VecDeque;

pub struct BufferedRewiredMemory {
    substrate: RewiredMemory,
    /// Extent index at which the buffer zone starts.
    buffer_start_extent: usize,
    total_buffers: usize,
    free_buffers: VecDeque<usize>,
}

impl BufferedRewiredMemory {
    pub fn new(pages_per_extent: usize, num_extents: usize, max_memory: usize, use_huge_pages: bool) -> Result<Self> {
        let substrate = RewiredMemory::new(pages_per_extent, num_extents, max_memory, use_huge_pages)?;
        let buffer_start_extent = substrate.allocated_extents();
        Ok(BufferedRewiredMemory {
            substrate,
            buffer_start_extent,
            total_buffers: 0,
            free_buffers: VecDeque::new(),
        })
    }

    fn extent_address(&self, extent_index: usize) -> usize {
        self.substrate.start_address() as usize + extent_index * self.substrate.extent_size()
    }

    fn add_buffers(&mut self, num_extents: usize) -> Result<()> {
        self.substrate.extend(num_extents)?;
        let first_new = self.buffer_start_extent + self.total_buffers;
        for i in 0..num_extents {
            self.free_buffers.push_front(first_new + i);
        }
        self.total_buffers += num_extents;
        debug!(
            "BufferedRewiredMemory::add_buffers +{} extents, total buffer capacity {}",
            num_extents, self.total_buffers
        );
        Ok(())
    }

    /// Acquire a free buffer extent's virtual address, growing the pool
    /// first if the free list is empty.
    pub fn acquire_buffer(&mut self) -> Result<usize> {
        if self.free_buffers.is_empty() {
            let grow_by = std::cmp::max(4, (self.total_buffers as f64 * 0.5) as usize);
            self.add_buffers(grow_by)?;
        }
        let extent = self
            .free_buffers
            .pop_back()
            .ok_or_else(|| PmaError::invariant("buffer pool unexpectedly empty after growth"))?;
        let addr = self.extent_address(extent);
        trace!("BufferedRewiredMemory::acquire_buffer -> {:#x}", addr);
        Ok(addr)
    }

    fn extent_index_of(&self, addr: usize) -> Result<usize> {
        let base = self.substrate.start_address() as usize;
        if addr < base {
            return Err(PmaError::rewiring(format!("address {:#x} below mapped range", addr)));
        }
        Ok((addr - base) / self.substrate.extent_size())
    }

    /// Swap the physical backing of `addr1`/`addr2`, exactly one of which
    /// must be a currently-acquired buffer extent; the buffer extent is
    /// returned to the free list afterwards.
    pub fn swap_and_release(&mut self, addr1: usize, addr2: usize) -> Result<()> {
        let idx1 = self.extent_index_of(addr1)?;
        let idx2 = self.extent_index_of(addr2)?;
        let buffer_boundary = self.buffer_start_extent;

        let (buffer_addr, user_addr) = match (idx1 >= buffer_boundary, idx2 >= buffer_boundary) {
            (true, false) => (addr1, addr2),
            (false, true) => (addr2, addr1),
            (true, true) => {
                return Err(PmaError::rewiring(format!(
                    "both addresses refer to buffers: {:#x}, {:#x}",
                    addr1, addr2
                )))
            }
            (false, false) => {
                return Err(PmaError::rewiring(format!(
                    "neither address refers to a buffer: {:#x}, {:#x}",
                    addr1, addr2
                )))
            }
        };

        self.substrate.swap(user_addr, buffer_addr)?;
        let buffer_extent = self.extent_index_of(buffer_addr)?;
        self.free_buffers.push_back(buffer_extent);
        Ok(())
    }

    /// Grow the user-visible region by `num_extents` extents, consuming
    /// buffer extents first and extending the substrate only if the
    /// buffer pool is insufficient. Precondition: no buffers in use.
    pub fn extend(&mut self, num_extents: usize) -> Result<()> {
        if num_extents == 0 {
            return Err(PmaError::invalid("extend: num_extents is zero"));
        }
        if self.used_buffers() != 0 {
            return Err(PmaError::invariant(format!(
                "extend called with {} buffers still in use",
                self.used_buffers()
            )));
        }

        if num_extents <= self.total_buffers {
            self.buffer_start_extent += num_extents;
            self.total_buffers -= num_extents;
            self.free_buffers.clear();
            for i in 0..self.total_buffers {
                self.free_buffers.push_front(self.buffer_start_extent + i);
            }
        } else {
            let additional = num_extents - self.total_buffers;
            self.substrate.extend(additional)?;
            self.total_buffers = 0;
            self.free_buffers.clear();
            self.buffer_start_extent = self.substrate.allocated_extents();
        }
        Ok(())
    }

    /// Shrink the user-visible region by `num_extents`, promoting the
    /// released extents to buffers. Precondition: no buffers in use.
    pub fn shrink(&mut self, num_extents: usize) -> Result<()> {
        if num_extents == 0 {
            return Err(PmaError::invalid("shrink: num_extents is zero"));
        }
        if self.used_buffers() != 0 {
            return Err(PmaError::invariant(format!(
                "shrink called with {} buffers still in use",
                self.used_buffers()
            )));
        }
        if num_extents > self.substrate.allocated_extents() - self.total_buffers {
            return Err(PmaError::invalid(
                "shrink: releasing more extents than are currently in user space",
            ));
        }
        self.buffer_start_extent -= num_extents;
        for i in 0..num_extents {
            self.free_buffers.push_front(self.buffer_start_extent + i);
        }
        self.total_buffers += num_extents;
        Ok(())
    }

    pub fn start_address(&self) -> *mut u8 {
        self.substrate.start_address()
    }

    pub fn extent_size(&self) -> usize {
        self.substrate.extent_size()
    }

    pub fn allocated_extents(&self) -> usize {
        self.substrate.allocated_extents()
    }

    pub fn allocated_memory_size(&self) -> usize {
        self.substrate.allocated_memory_size()
    }

    pub fn user_extents(&self) -> usize {
        self.buffer_start_extent
    }

    pub fn total_buffers(&self) -> usize {
        self.total_buffers
    }

    pub fn used_buffers(&self) -> usize {
        self.total_buffers - self.free_buffers.len()
    }

    pub fn max_memory(&self) -> usize {
        self.substrate.max_memory()
    }

    /// A typed view of the `i`-th user extent's byte range as `[i64]` slots.
    ///
    /// # Safety
    /// Same requirements as [`RewiredMemory::extent_slots`].
    pub unsafe fn extent_slots(&self, extent_index: usize) -> &mut [i64] {
        debug_assert!(extent_index < self.buffer_start_extent);
        self.substrate.extent_slots(extent_index)
    }

    /// A typed view of the whole user-visible region as `[i64]` slots.
    ///
    /// # Safety
    /// Same requirements as [`RewiredMemory::extent_slots`].
    pub unsafe fn user_slots(&self) -> &mut [i64] {
        let ptr = self.substrate.start_address() as *mut i64;
        std::slice::from_raw_parts_mut(ptr, self.user_extents() * self.extent_size() / 8)
    }
}

/// RAII guard releasing an acquired buffer back to the pool via
/// `swap_and_release` on every exit path, including error unwinds, per
/// Design Notes "Scoped scratch resources".
pub struct ScratchBuffer<'a> {
    pool: &'a mut BufferedRewiredMemory,
    addr: usize,
    released: bool,
}

impl<'a> ScratchBuffer<'a> {
    pub fn acquire(pool: &'a mut BufferedRewiredMemory) -> Result<Self> {
        let addr = pool.acquire_buffer()?;
        Ok(ScratchBuffer {
            pool,
            addr,
            released: false,
        })
    }

    pub fn address(&self) -> usize {
        self.addr
    }

    /// Swap the buffer into `user_addr` and release it back to the pool.
    pub fn release_into(mut self, user_addr: usize) -> Result<()> {
        self.pool.swap_and_release(user_addr, self.addr)?;
        self.released = true;
        Ok(())
    }
}

impl<'a> Drop for ScratchBuffer<'a> {
    fn drop(&mut self) {
        if !self.released {
            debug!(
                "ScratchBuffer dropped without release at {:#x}; leaking as an unused buffer would \
                 desynchronise the pool, this indicates a logic error upstream",
                self.addr
            );
        }
    }
}
