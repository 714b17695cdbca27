//! ChunkGroup (component C): a growable collection of same-cell-size
//! `Chunk`s, sorted by base address except for a single unsorted tail that
//! gets folded into the sorted prefix on the next append.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use log::{trace, warn};

use super::chunk::Chunk;
use super::pool::PoolOptions;
use crate::error::{Result, XyError};

const CACHE_LINE: usize = 64;

pub(crate) struct ChunkGroup {
    cell_size: u32,
    next_cell_count: u32,
    chunks: Vec<Chunk>,
    /// Single contiguous arena backing every chunk's state bitmap; each
    /// chunk owns a disjoint subrange `[state_pos, state_pos+state_count)`.
    states: Vec<u64>,
}

impl ChunkGroup {
    pub(crate) fn new(cell_size: u32, initial_cell_count: u32) -> Self {
        ChunkGroup {
            cell_size,
            next_cell_count: initial_cell_count,
            chunks: Vec::new(),
            states: Vec::new(),
        }
    }

    /// Sorts the previous tail into the sorted prefix (amortized across
    /// appends, never paid more than once per chunk).
    fn fix_sort(&mut self) {
        let len = self.chunks.len();
        if len < 2 {
            return;
        }
        let last = self.chunks.pop().unwrap();
        let pos = self.chunks[..len - 1].partition_point(|c| c.base < last.base);
        self.chunks.insert(pos, last);
    }

    fn create(&mut self, options: &PoolOptions) -> Result<()> {
        self.fix_sort();

        let cell_bytes = self.cell_size as usize * self.next_cell_count as usize;
        let align = usize::max(self.cell_size.next_power_of_two() as usize, 8).min(CACHE_LINE).max(8);
        let layout = Layout::from_size_align(cell_bytes.max(1), align).expect("chunk layout overflow");
        let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(XyError::Alloc {
            bytes: cell_bytes,
            align,
        })?;

        let state_words = ((self.next_cell_count + 63) / 64) as usize;
        let state_pos = self.states.len() as u32;
        self.states.resize(self.states.len() + state_words, 0);
        let state_slice = &mut self.states[state_pos as usize..];

        trace!(
            "create chunk: ptr={base:p} bytes={cell_bytes} size={} align={align} count={}",
            self.cell_size, self.next_cell_count
        );

        let chunk = Chunk::new(base, self.cell_size, self.next_cell_count, state_pos, state_slice);
        self.chunks.push(chunk);

        if self.next_cell_count < options.chunk_max_cells {
            let grown = (self.next_cell_count as f64 * options.grow_factor as f64) as u64;
            let mut grown = grown.min(options.chunk_max_cells as u64) as u32;
            let max_cells = u32::MAX / self.cell_size;
            if grown > max_cells {
                grown = max_cells;
            }
            self.next_cell_count = grown.max(1);
        }
        Ok(())
    }

    fn try_get(&mut self) -> Option<NonNull<u8>> {
        let state_pos_of = |c: &Chunk| c.state_pos as usize;
        for chunk in self.chunks.iter_mut().rev() {
            let pos = state_pos_of(chunk);
            let len = chunk.state_count as usize;
            if let Some(p) = chunk.allocate(&mut self.states[pos..pos + len]) {
                return Some(p);
            }
        }
        None
    }

    pub(crate) fn allocate(&mut self, options: &PoolOptions) -> Result<NonNull<u8>> {
        if let Some(p) = self.try_get() {
            return Ok(p);
        }
        self.create(options)?;
        let last = self.chunks.last_mut().unwrap();
        let pos = last.state_pos as usize;
        let len = last.state_count as usize;
        Ok(last
            .allocate(&mut self.states[pos..pos + len])
            .expect("freshly created chunk must have capacity"))
    }

    pub(crate) fn deallocate(&mut self, p: NonNull<u8>) {
        if self.chunks.is_empty() {
            warn!("free of cell not belonging to any chunk group (group empty)");
            return;
        }
        let last_idx = self.chunks.len() - 1;
        if self.chunks[last_idx].contains(p) {
            let pos = self.chunks[last_idx].state_pos as usize;
            let len = self.chunks[last_idx].state_count as usize;
            self.chunks[last_idx].deallocate(p, &mut self.states[pos..pos + len]);
            return;
        }
        if self.chunks.len() == 1 {
            warn!("free of cell not belonging to this chunk group");
            return;
        }
        // Binary search the sorted prefix (everything but the last chunk)
        // for the chunk whose base is the greatest one <= p.
        let prefix = &self.chunks[..last_idx];
        let idx = prefix.partition_point(|c| c.base.as_ptr() as usize <= p.as_ptr() as usize);
        if idx == 0 {
            warn!("free of cell below every chunk in this group");
            return;
        }
        let idx = idx - 1;
        if !self.chunks[idx].contains(p) {
            warn!("free of cell not belonging to this chunk group");
            return;
        }
        let pos = self.chunks[idx].state_pos as usize;
        let len = self.chunks[idx].state_count as usize;
        self.chunks[idx].deallocate(p, &mut self.states[pos..pos + len]);
    }

    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[cfg(test)]
    pub(crate) fn first_chunk_cell_count(&self) -> u32 {
        self.chunks[0].cell_count
    }

    pub(crate) fn release(&mut self) {
        for chunk in self.chunks.iter().rev() {
            #[cfg(debug_assertions)]
            {
                let pos = chunk.state_pos as usize;
                let len = chunk.state_count as usize;
                let used = chunk.used_count(&self.states[pos..pos + len]);
                if used > 0 {
                    warn!("releasing chunk with {used} cell(s) still in use (ptr={:p})", chunk.base);
                } else {
                    log::debug!("release chunk: ptr={:p} bytes={}", chunk.base, chunk.data_bytes());
                }
            }
            let align = usize::max(self.cell_size.next_power_of_two() as usize, 8).min(CACHE_LINE).max(8);
            let layout = Layout::from_size_align(chunk.data_bytes().max(1), align).unwrap();
            unsafe { alloc::dealloc(chunk.base.as_ptr(), layout) };
        }
        self.chunks.clear();
        self.states.clear();
    }
}

impl Drop for ChunkGroup {
    fn drop(&mut self) {
        if !self.chunks.is_empty() {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> PoolOptions {
        PoolOptions::default()
    }

    #[test]
    fn allocate_reuses_freed_cells_without_new_chunk() {
        let mut group = ChunkGroup::new(24, 8);
        let o = opts();
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            ptrs.push(group.allocate(&o).unwrap());
        }
        assert_eq!(group.chunks.len(), 1);
        for p in ptrs.iter().rev() {
            group.deallocate(*p);
        }
        let mut reused = Vec::new();
        for _ in 0..8 {
            reused.push(group.allocate(&o).unwrap());
        }
        assert_eq!(group.chunks.len(), 1, "no new chunk should have been created");
        group.release();
    }

    #[test]
    fn second_chunk_created_on_exhaustion() {
        let mut group = ChunkGroup::new(8, 4);
        let o = opts();
        for _ in 0..4 {
            group.allocate(&o).unwrap();
        }
        assert_eq!(group.chunks.len(), 1);
        group.allocate(&o).unwrap();
        assert_eq!(group.chunks.len(), 2);
        group.release();
    }

    #[test]
    fn deallocate_across_multiple_chunks() {
        let mut group = ChunkGroup::new(8, 2);
        let o = opts();
        let mut ptrs = Vec::new();
        for _ in 0..10 {
            ptrs.push(group.allocate(&o).unwrap());
        }
        assert!(group.chunks.len() > 1);
        for p in ptrs {
            group.deallocate(p);
        }
        group.release();
    }
}
