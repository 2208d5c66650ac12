//! Small helpers for arena buffers, tests, and logging.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

/// A page-sized, page-aligned, zeroed chunk of bytes.
#[derive(Clone)]
#[repr(align(4096))]
pub struct Frame(pub [u8; Frame::SIZE]);

const _: () = assert!(core::mem::size_of::<Frame>() == Frame::SIZE);
const _: () = assert!(core::mem::align_of::<Frame>() == Frame::SIZE);

impl Frame {
    pub const SIZE: usize = 1 << 12;

    pub const fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

/// Allocate a page-aligned buffer of at least `size` bytes.
pub fn aligned_buf(size: usize) -> Vec<Frame> {
    vec![Frame::new(); size.div_ceil(Frame::SIZE).max(1)]
}

/// Simple fast random number generator based on wyrand.
///
/// @see https://github.com/wangyi-fudan/wyhash
pub struct WyRand {
    pub seed: u64,
}

impl WyRand {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn gen(&mut self) -> u64 {
        self.seed = self.seed.wrapping_add(0xa076_1d64_78bd_642f);
        let t = (self.seed as u128).wrapping_mul((self.seed ^ 0xe703_7ed1_a0b4_28db) as u128);
        (t.wrapping_shr(64) ^ t) as u64
    }

    pub fn range(&mut self, range: Range<u64>) -> u64 {
        let span = range.end - range.start;
        range.start + self.gen() % span
    }

    pub fn shuffle<T>(&mut self, target: &mut [T]) {
        for i in (1..target.len()).rev() {
            target.swap(i, self.range(0..i as u64 + 1) as usize);
        }
    }
}

/// Initialize the logger for tests and binaries.
#[cfg(feature = "std")]
pub fn logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init();
}
