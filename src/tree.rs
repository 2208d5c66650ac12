//! Buddy tree over a byte arena.
//!
//! The tree is a complete binary tree in 1-based heap order. The root block
//! at level 1 spans the whole arena; every descent halves the block size.
//! All node state lives in the two-bit [`Bitfield`], so the walks below are
//! the only bookkeeping there is: no free lists, no per-allocation headers.

use log::error;

use crate::bitfield::Bitfield;
use crate::{Error, Result};

/// Left child of cell `c` in 1-based heap order.
#[inline]
pub const fn left(c: usize) -> usize {
    2 * c
}

/// Right child of cell `c` in 1-based heap order.
#[inline]
pub const fn right(c: usize) -> usize {
    2 * c + 1
}

/// Running allocation totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Sum of the block sizes of currently full cells.
    pub inuse: usize,
    /// Arena bytes not covered by full cells.
    pub unused: usize,
    /// Sum of the raw request sizes honored.
    pub requested: usize,
}

/// Binary-buddy tree managing `size` bytes across `levels` levels.
///
/// Allocation descends to the smallest block that still fits the request,
/// left before right. Free rediscovers the allocated cell from the offset
/// alone and merges free buddies on the way back up.
pub struct Tree {
    levels: usize,
    size: usize,
    cells: Bitfield,
    stats: Stats,
}

impl Tree {
    /// Create an all-free tree of `levels` levels over `size` arena bytes.
    ///
    /// `size` must be a power of two and large enough that the smallest
    /// block `size / 2^(levels-1)` is at least one byte.
    pub fn new(size: usize, levels: usize) -> Result<Self> {
        if levels == 0
            || levels >= usize::BITS as usize
            || !size.is_power_of_two()
            || size >> (levels - 1) == 0
        {
            return Err(Error::Initialization);
        }
        Ok(Self {
            levels,
            size,
            cells: Bitfield::new((1 << levels) - 1),
            stats: Stats {
                inuse: 0,
                unused: size,
                requested: 0,
            },
        })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn cells(&self) -> &Bitfield {
        &self.cells
    }

    /// Block size at `level`, root = 1.
    pub fn block_size(&self, level: usize) -> usize {
        debug_assert!((1..=self.levels).contains(&level));
        self.size >> (level - 1)
    }

    /// Allocate `size` bytes, returning the arena offset of the block.
    pub fn get(&mut self, size: usize) -> Result<usize> {
        self.get_at(size, 1, 1)
    }

    /// Free the allocation at arena offset `off`, merging free buddies.
    pub fn put(&mut self, off: usize) -> Result<()> {
        self.put_at(off, 1, 1).inspect_err(|_| {
            error!("no allocation at offset {off:#x}");
        })
    }

    fn get_at(&mut self, size: usize, level: usize, cell: usize) -> Result<usize> {
        if level > self.levels || size == 0 {
            return Err(Error::Memory);
        }
        let max = self.size >> (level - 1);
        let min = max >> 1;

        // The smallest level whose block still fits the request; at the
        // deepest level anything that fits is taken.
        if size <= max && (size > min || level == self.levels) {
            if !self.cells.is_free(cell) {
                return Err(Error::Memory);
            }
            self.cells.mark_full(cell);
            self.stats.inuse += max;
            self.stats.unused -= max;
            self.stats.requested += size;
            return Ok(0);
        }

        // A block allocated as a whole has no room below, even though its
        // descendants are still tagged free.
        if self.cells.is_full(cell) {
            return Err(Error::Memory);
        }

        match self.get_at(size, level + 1, left(cell)) {
            Ok(off) => {
                self.cells.mark_split(cell);
                Ok(off)
            }
            Err(_) => {
                let off = self.get_at(size, level + 1, right(cell))?;
                self.cells.mark_split(cell);
                Ok(min + off)
            }
        }
    }

    /// `off` is relative to the current cell's block; it is reduced by the
    /// left sibling's size exactly when entering a right child.
    fn put_at(&mut self, off: usize, level: usize, cell: usize) -> Result<()> {
        if level > self.levels {
            return Err(Error::Address);
        }
        let max = self.size >> (level - 1);
        let min = max >> 1;

        if self.cells.is_full(cell) {
            // Only the block start names this allocation; anything else
            // points into the middle of the live block.
            if off != 0 {
                return Err(Error::Address);
            }
            self.cells.mark_free(cell);
            self.stats.inuse -= max;
            self.stats.unused += max;
            self.stats.requested = self.stats.requested.saturating_sub(max);
            return Ok(());
        }
        if self.cells.is_free(cell) {
            // Nothing allocated at or below this cell.
            return Err(Error::Address);
        }

        let res = match self.put_at(off, level + 1, left(cell)) {
            Err(_) if off >= min => self.put_at(off - min, level + 1, right(cell)),
            res => res,
        };
        // Merge buddies.
        if res.is_ok() && self.cells.is_free(left(cell)) && self.cells.is_free(right(cell)) {
            self.cells.mark_free(cell);
        }
        res
    }
}

#[cfg(all(test, feature = "std"))]
mod test {
    use alloc::vec::Vec;

    use log::warn;

    use super::{left, right, Stats, Tree};
    use crate::util::{logging, WyRand};
    use crate::Error;

    fn tree128() -> Tree {
        Tree::new(128, 4).unwrap()
    }

    #[test]
    fn heap_order() {
        assert_eq!(left(1), 2);
        assert_eq!(right(1), 3);
        assert_eq!(left(4), 8);
        assert_eq!(right(4), 9);
    }

    #[test]
    fn whole_arena() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(128), Ok(0));
        assert!(t.cells.is_full(1));
        assert_eq!(t.stats.inuse, 128);
        assert_eq!(t.stats.unused, 0);
        assert_eq!(t.stats.requested, 128);

        // a full root leaves no room anywhere
        assert_eq!(t.get(1), Err(Error::Memory));

        t.put(0).unwrap();
        assert!(t.cells.is_clear());
        assert_eq!(
            t.stats,
            Stats {
                inuse: 0,
                unused: 128,
                requested: 0
            }
        );
    }

    #[test]
    fn smallest_block() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(16), Ok(0));
        // split chain down the leftmost path, leaf 8 holds the block
        assert!(t.cells.is_split(1));
        assert!(t.cells.is_split(2));
        assert!(t.cells.is_split(4));
        assert!(t.cells.is_full(8));
        assert_eq!(t.cells.as_bytes(), [0b1000_1010, 0b1100_0000, 0, 0]);
        assert_eq!(t.stats.inuse, 16);
        assert_eq!(t.stats.unused, 112);
    }

    #[test]
    fn sibling_leaves() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(16), Ok(0));
        assert_eq!(t.get(16), Ok(16));
        assert!(t.cells.is_full(8));
        assert!(t.cells.is_full(9));
        // the parent of two full leaves stays split, it never becomes full
        assert!(t.cells.is_split(4));
        assert_eq!(
            t.cells.as_bytes(),
            [0b1000_1010, 0b1100_0000, 0b0000_0011, 0]
        );

        t.put(0).unwrap();
        assert!(t.cells.is_free(8));
        assert!(t.cells.is_split(4));

        // freeing the buddy merges all the way up to the root
        t.put(16).unwrap();
        assert!(t.cells.is_clear());
        assert_eq!(
            t.stats,
            Stats {
                inuse: 0,
                unused: 128,
                requested: 0
            }
        );
    }

    #[test]
    fn halves() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(64), Ok(0));
        assert!(t.cells.is_split(1));
        assert!(t.cells.is_full(2));
        assert_eq!(t.get(64), Ok(64));
        assert!(t.cells.is_full(3));
        assert_eq!(t.get(1), Err(Error::Memory));

        t.put(0).unwrap();
        t.put(64).unwrap();
        assert!(t.cells.is_clear());
    }

    #[test]
    fn rounding() {
        logging();
        let mut t = tree128();

        // 33 exceeds the 32 byte blocks of level 3 and lands in a 64 byte
        // block at level 2
        assert_eq!(t.get(33), Ok(0));
        assert!(t.cells.is_full(2));
        assert_eq!(t.stats.inuse, 64);
        assert_eq!(t.stats.requested, 33);
        assert!(t.stats.requested <= t.stats.inuse);
    }

    #[test]
    fn bounds() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(0), Err(Error::Memory));
        assert_eq!(t.get(129), Err(Error::Memory));
        assert_eq!(t.get(128), Ok(0));
        assert_eq!(t.stats.unused, 0);
    }

    #[test]
    fn leftmost_path() {
        logging();
        let mut t = tree128();

        // smallest blocks fill the leaves left to right
        for i in 0..8 {
            assert_eq!(t.get(16), Ok(i * 16));
        }
        assert_eq!(t.get(16), Err(Error::Memory));

        for i in 0..8 {
            t.put(i * 16).unwrap();
        }
        assert!(t.cells.is_clear());
    }

    #[test]
    fn unknown_put() {
        logging();
        let mut t = tree128();

        assert_eq!(t.get(64), Ok(0));
        let stats = t.stats;

        // middle of the live block
        assert_eq!(t.put(16), Err(Error::Address));
        // free half of the arena
        assert_eq!(t.put(64), Err(Error::Address));
        assert_eq!(t.stats, stats);
        assert!(t.cells.is_full(2));

        t.put(0).unwrap();
        assert_eq!(t.put(0), Err(Error::Address));
        assert!(t.cells.is_clear());
    }

    #[test]
    fn init() {
        logging();
        assert_eq!(Tree::new(128, 0).err(), Some(Error::Initialization));
        assert_eq!(Tree::new(96, 4).err(), Some(Error::Initialization));
        assert_eq!(Tree::new(8, 5).err(), Some(Error::Initialization));
        assert!(Tree::new(8, 4).is_ok());

        // single level: everything lands at the root
        let mut t = Tree::new(16, 1).unwrap();
        assert_eq!(t.get(1), Ok(0));
        assert!(t.cells.is_full(1));
        assert_eq!(t.stats.inuse, 16);
        t.put(0).unwrap();
        assert!(t.cells.is_clear());
    }

    #[test]
    fn rand_cycle() {
        logging();

        const SIZE: usize = 1 << 12;
        let mut t = Tree::new(SIZE, 6).unwrap();
        let smallest = t.block_size(t.levels());
        let mut rng = WyRand::new(42);

        for round in 0..16 {
            let mut blocks = Vec::new();
            loop {
                let size = rng.range(1..1 << 10) as usize;
                match t.get(size) {
                    Ok(off) => {
                        assert_eq!(off % smallest, 0);
                        blocks.push(off);
                    }
                    Err(Error::Memory) => break,
                    Err(e) => panic!("{e:?}"),
                }
            }
            assert_eq!(t.stats.inuse + t.stats.unused, SIZE);
            warn!("round {round}: {} blocks", blocks.len());

            rng.shuffle(&mut blocks);
            for off in blocks {
                t.put(off).unwrap();
            }
            assert!(t.cells.is_clear());
            assert_eq!(
                t.stats,
                Stats {
                    inuse: 0,
                    unused: SIZE,
                    requested: 0
                }
            );
        }
    }
}
