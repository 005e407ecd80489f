//! Fixed chunk arena with index-based free lists.
//!
//! ```text
//!   chunks: [ c0 | c1 | c2 | c3 | ... | cN-1 ]     SIZE bytes each
//!   free:   [ 7, 5, 3 ]  ◀── alloc pops, release pushes
//!   msg A:  [ 0, 1, 2 ]      chunk indices in payload order
//!   msg B:  [ 4, 6 ]
//! ```

use heapless::Vec;

use crate::config::ACCESS_PAYLOAD_MAX;
use crate::error::{Error, Result};

/// Chunk indices owned by one message, in payload order.
pub type ChunkList<const N: usize> = Vec<u16, N>;

/// Stack of free indices into a fixed array of `N` entries.
pub struct FreeList<const N: usize> {
    free: Vec<u16, N>,
}

impl<const N: usize> FreeList<N> {
    /// Every index free; the lowest is handed out first.
    pub fn full() -> Self {
        Self {
            free: (0..N).rev().map(|idx| idx as u16).collect(),
        }
    }

    pub fn alloc(&mut self) -> Option<u16> {
        self.free.pop()
    }

    pub fn release(&mut self, idx: u16) {
        debug_assert!((idx as usize) < N, "index {idx} out of range");
        debug_assert!(!self.free.contains(&idx), "double release of {idx}");
        let pushed = self.free.push(idx);
        debug_assert!(pushed.is_ok(), "free list overflow");
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// `COUNT` chunks of `SIZE` bytes shared by all pending messages.
pub struct ChunkPool<const SIZE: usize, const COUNT: usize> {
    chunks: [[u8; SIZE]; COUNT],
    free: FreeList<COUNT>,
}

impl<const SIZE: usize, const COUNT: usize> Default for ChunkPool<SIZE, COUNT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const COUNT: usize> ChunkPool<SIZE, COUNT> {
    pub fn new() -> Self {
        Self {
            chunks: [[0; SIZE]; COUNT],
            free: FreeList::full(),
        }
    }

    /// Chunks needed to hold `len` bytes.
    pub const fn chunks_for(len: usize) -> usize {
        len.div_ceil(SIZE)
    }

    pub fn available(&self) -> usize {
        self.free.available()
    }

    /// Copy `payload` into freshly allocated chunks.
    ///
    /// All or nothing: on shortfall every chunk taken so far is returned.
    pub fn store(&mut self, payload: &[u8]) -> Result<ChunkList<COUNT>> {
        if Self::chunks_for(payload.len()) > self.available() {
            return Err(Error::ResourceExhausted);
        }

        let mut list = ChunkList::new();
        for part in payload.chunks(SIZE) {
            let Some(idx) = self.free.alloc() else {
                self.release(&mut list);
                return Err(Error::ResourceExhausted);
            };
            self.chunks[idx as usize][..part.len()].copy_from_slice(part);
            let pushed = list.push(idx);
            debug_assert!(pushed.is_ok(), "more chunks than the pool holds");
        }
        Ok(list)
    }

    /// Reassemble the first `len` bytes held by `list`.
    pub fn read(
        &self,
        list: &ChunkList<COUNT>,
        len: usize,
    ) -> Result<Vec<u8, ACCESS_PAYLOAD_MAX>> {
        let mut out = Vec::new();
        let mut left = len;
        for &idx in list {
            let take = left.min(SIZE);
            out.extend_from_slice(&self.chunks[idx as usize][..take])
                .map_err(|_| Error::OutOfMemory)?;
            left -= take;
        }
        if left != 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(out)
    }

    /// Return every chunk in `list` to the pool.
    pub fn release(&mut self, list: &mut ChunkList<COUNT>) {
        while let Some(idx) = list.pop() {
            self.free.release(idx);
        }
    }
}
