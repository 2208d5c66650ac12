//! Binary-buddy allocation over a caller-provided arena.
//!
//! The allocator subdivides a power-of-two arena along a complete binary
//! tree of blocks: the root block covers the whole arena and every level
//! halves the block size. Its distinguishing property is that the entire
//! allocator state lives in a fixed two-bit-per-cell [`Bitfield`] sized by
//! the number of tree levels, independent of how many allocations are live.
//! There are no free lists and no per-allocation headers, and the arena
//! memory itself is never read or written.
//!
//! ```
//! use bitbuddy::BuddyAlloc;
//! use bitbuddy::util::aligned_buf;
//!
//! let mut arena = aligned_buf(128);
//! let mut alloc = BuddyAlloc::new(arena.as_mut_ptr().cast(), 128, 4).unwrap();
//!
//! // 33 bytes are served from a 64 byte block
//! let block = alloc.get(33).unwrap();
//! assert_eq!(alloc.inuse(), 64);
//! assert_eq!(alloc.requested(), 33);
//!
//! alloc.put(block).unwrap();
//! assert_eq!(alloc.inuse(), 0);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use core::fmt;

use log::{error, info, warn};

mod bitfield;
mod tree;
pub mod util;

pub use bitfield::{Bitfield, Tag};
pub use tree::{Stats, Tree};

/// Error codes of this allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Not enough memory.
    Memory,
    /// Invalid address.
    Address,
    /// Invalid construction parameters.
    Initialization,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Buddy allocator over an external arena.
///
/// The arena is only subdivided, never dereferenced: the caller owns its
/// memory from creation to destruction and has to keep it mapped for as
/// long as blocks are handed out. All mutating calls take `&mut self`, so
/// at most one operation runs at a time; wrap the allocator in external
/// mutual exclusion for concurrent use.
pub struct BuddyAlloc {
    begin: usize,
    tree: Tree,
}

impl BuddyAlloc {
    /// Create an allocator with `levels` tree levels over the `size` byte
    /// arena at `begin`.
    ///
    /// `size` must be a power of two and the caller should hand in a
    /// page-aligned arena. The smallest servable block is
    /// `size / 2^(levels-1)`.
    pub fn new(begin: *mut u8, size: usize, levels: usize) -> Result<Self> {
        if begin.is_null() {
            return Err(Error::Initialization);
        }
        let tree = Tree::new(size, levels)?;
        info!(
            "managing {size} bytes at {begin:p}, {levels} levels, smallest block {}",
            tree.block_size(levels)
        );
        Ok(Self {
            begin: begin as usize,
            tree,
        })
    }

    /// Allocate `size` bytes, rounded up to the next fitting block.
    pub fn get(&mut self, size: usize) -> Result<*mut u8> {
        let off = self.tree.get(size)?;
        Ok((self.begin + off) as *mut u8)
    }

    /// Free the block previously returned for `ptr`.
    ///
    /// Null, out-of-range, and unknown pointers are rejected with
    /// [`Error::Address`] and leave the allocator untouched.
    pub fn put(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            error!("free of null");
            return Err(Error::Address);
        }
        let addr = ptr as usize;
        if !(self.begin..self.begin + self.tree.size()).contains(&addr) {
            error!("free of {ptr:p} outside the arena");
            return Err(Error::Address);
        }
        self.tree.put(addr - self.begin)
    }

    pub fn begin(&self) -> *mut u8 {
        self.begin as *mut u8
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn levels(&self) -> usize {
        self.tree.levels()
    }

    /// Bytes covered by currently allocated blocks.
    pub fn inuse(&self) -> usize {
        self.tree.stats().inuse
    }

    /// Bytes not covered by any allocated block.
    pub fn unused(&self) -> usize {
        self.tree.stats().unused
    }

    /// Raw bytes requested by the callers of the live allocations.
    pub fn requested(&self) -> usize {
        self.tree.stats().requested
    }

    /// The tree state, two bits per cell.
    pub fn cells(&self) -> &Bitfield {
        self.tree.cells()
    }

    /// Log the full observable state.
    pub fn dump(&self) {
        warn!("{self:?}");
    }
}

impl fmt::Debug for BuddyAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.tree.stats();
        f.debug_struct("BuddyAlloc")
            .field("begin", &format_args!("{:#x}", self.begin))
            .field("size", &self.tree.size())
            .field("inuse", &stats.inuse)
            .field("requested", &stats.requested)
            .field("unused", &stats.unused)
            .field("cells", self.tree.cells())
            .finish()
    }
}
