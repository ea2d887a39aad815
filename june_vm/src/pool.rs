//! Size-bucketed pool allocator for frequently-created runtime objects.
//!
//! Mirrors the VM's own `MemoryManager`: fixed-size 4 KiB pool chunks are
//! bumped into for small requests, freed blocks go back onto a per-size-class
//! freelist, and anything larger than a pool chunk bypasses the pool and
//! goes straight to the system allocator. All sizes are rounded up to a
//! multiple of 8 before bucketing.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Size of a single pool chunk.
pub const POOL_SIZE: usize = 4 * 1024;

/// Round `sz` up to the next multiple of 8.
pub fn round_up8(sz: usize) -> usize {
    (sz + 7) & !7
}

struct PoolChunk {
    mem: NonNull<u8>,
    used: usize,
}

#[derive(Default)]
struct Inner {
    chunks: Vec<PoolChunk>,
    free_lists: HashMap<usize, Vec<NonNull<u8>>>,
    total_allocated: u64,
    total_requested_outside_pool: u64,
    request_count: u64,
    total_manually_allocated: u64,
}

impl Inner {
    fn alloc_chunk(&mut self) {
        let layout = Layout::from_size_align(POOL_SIZE, 8).expect("pool chunk layout");
        // SAFETY: layout has non-zero size, so `alloc` is well-defined to call;
        // a null return is handled by aborting via `handle_alloc_error`.
        let mem = unsafe { alloc(layout) };
        let mem = match NonNull::new(mem) {
            Some(p) => p,
            None => std::alloc::handle_alloc_error(layout),
        };
        self.total_allocated += POOL_SIZE as u64;
        self.chunks.push(PoolChunk { mem, used: 0 });
    }
}

/// A pool-allocated block handle. Tracks the size it was allocated with so
/// `Pool::free` can route it back to the correct freelist (or the system
/// allocator) without the caller having to remember which path served it.
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    size: usize,
    from_pool: bool,
}

impl Block {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Debug-only accounting counters, mirroring the original's `JuneMemDebug`
/// build-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_allocated: u64,
    pub total_requested_outside_pool: u64,
    pub request_count: u64,
    pub total_manually_allocated: u64,
}

/// The pool allocator itself. Single global mutex, same as the original's
/// `MemLock`: it exists so auxiliary helper threads spawned by native
/// modules can allocate through the same pool as the single-threaded VM.
#[derive(Default)]
pub struct Pool {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a block of at least `requested` bytes.
    pub fn alloc(&self, requested: usize) -> Option<Block> {
        if requested == 0 {
            return None;
        }
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        inner.total_requested_outside_pool += requested as u64;
        inner.request_count += 1;

        let sz = round_up8(requested);

        if sz > POOL_SIZE {
            let layout = Layout::from_size_align(sz, 8).expect("oversized block layout");
            // SAFETY: non-zero size; null is handled below.
            let mem = unsafe { alloc(layout) };
            let ptr = match NonNull::new(mem) {
                Some(p) => p,
                None => std::alloc::handle_alloc_error(layout),
            };
            inner.total_manually_allocated += sz as u64;
            return Some(Block {
                ptr,
                size: sz,
                from_pool: false,
            });
        }

        if let Some(free) = inner.free_lists.get_mut(&sz) {
            if let Some(ptr) = free.pop() {
                return Some(Block {
                    ptr,
                    size: sz,
                    from_pool: true,
                });
            }
        }

        if !inner.chunks.iter().any(|c| POOL_SIZE - c.used >= sz) {
            inner.alloc_chunk();
        }
        let chunk = inner
            .chunks
            .iter_mut()
            .find(|c| POOL_SIZE - c.used >= sz)
            .expect("a chunk with room was just ensured to exist");
        // SAFETY: `chunk.used + sz <= POOL_SIZE`, so this stays within the chunk's allocation.
        let ptr = unsafe { NonNull::new_unchecked(chunk.mem.as_ptr().add(chunk.used)) };
        chunk.used += sz;
        Some(Block {
            ptr,
            size: sz,
            from_pool: true,
        })
    }

    /// Return a block to the pool (or the system allocator for oversized blocks).
    pub fn free(&self, block: Block) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if block.from_pool {
            inner
                .free_lists
                .entry(block.size)
                .or_default()
                .push(block.ptr);
        } else {
            let layout = Layout::from_size_align(block.size, 8).expect("oversized block layout");
            // SAFETY: `block.ptr` was allocated with an identical layout in `alloc` above,
            // and `free` consumes `block` so it cannot be freed twice.
            unsafe { dealloc(block.ptr.as_ptr(), layout) };
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        PoolStats {
            total_allocated: inner.total_allocated,
            total_requested_outside_pool: inner.total_requested_outside_pool,
            request_count: inner.request_count,
            total_manually_allocated: inner.total_manually_allocated,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        // Oversized freelisted blocks were allocated individually; release them.
        for (&sz, blocks) in inner.free_lists.iter() {
            if sz > POOL_SIZE {
                let layout = Layout::from_size_align(sz, 8).expect("oversized block layout");
                for ptr in blocks {
                    // SAFETY: each pointer was allocated with this same layout and is
                    // being freed exactly once, here, during teardown.
                    unsafe { dealloc(ptr.as_ptr(), layout) };
                }
            }
        }
        inner.free_lists.clear();

        let layout = Layout::from_size_align(POOL_SIZE, 8).expect("pool chunk layout");
        for chunk in inner.chunks.drain(..) {
            // SAFETY: each chunk was allocated with this same layout in `alloc_chunk`.
            unsafe { dealloc(chunk.mem.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up8_rounds_to_multiple_of_eight() {
        assert_eq!(round_up8(0), 0);
        assert_eq!(round_up8(1), 8);
        assert_eq!(round_up8(8), 8);
        assert_eq!(round_up8(9), 16);
    }

    #[test]
    fn small_allocations_come_from_a_pool_chunk() {
        let pool = Pool::new();
        let b = pool.alloc(16).unwrap();
        assert_eq!(b.size(), 16);
        let stats = pool.stats();
        assert_eq!(stats.total_allocated, POOL_SIZE as u64);
        pool.free(b);
    }

    #[test]
    fn oversized_allocations_bypass_the_pool() {
        let pool = Pool::new();
        let b = pool.alloc(POOL_SIZE + 1).unwrap();
        assert!(!b.from_pool);
        let stats = pool.stats();
        assert!(stats.total_manually_allocated >= (POOL_SIZE + 1) as u64);
        pool.free(b);
    }

    #[test]
    fn freed_blocks_are_reused_from_the_freelist() {
        let pool = Pool::new();
        let b1 = pool.alloc(32).unwrap();
        let ptr1 = b1.as_ptr();
        pool.free(b1);
        let b2 = pool.alloc(32).unwrap();
        assert_eq!(ptr1, b2.as_ptr());
        pool.free(b2);
    }

    #[test]
    fn zero_sized_requests_return_none() {
        let pool = Pool::new();
        assert!(pool.alloc(0).is_none());
    }

    #[test]
    fn exhausting_a_chunk_allocates_a_new_one() {
        let pool = Pool::new();
        let mut blocks = Vec::new();
        // Each block is 512 bytes; a single 4 KiB chunk holds 8 of them.
        for _ in 0..9 {
            blocks.push(pool.alloc(512).unwrap());
        }
        let stats = pool.stats();
        assert_eq!(stats.total_allocated, (POOL_SIZE * 2) as u64);
        for b in blocks {
            pool.free(b);
        }
    }
}
