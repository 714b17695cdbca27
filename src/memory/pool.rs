//! Pool (component E): the public façade combining size-class routing (A),
//! chunk groups (C) and the oversize registry (D) into one allocator.

use std::ptr::NonNull;

use log::{debug, warn};

use super::block_set::BlockSet;
use super::chunk_group::ChunkGroup;
use super::size_class::{self, CLASSES};
use crate::error::{Result, XyError};

/// Configuration accepted by `Pool::init`. Mirrors the tunables in spec §6;
/// out-of-range values are clamped rather than rejected, matching the
/// source's "sane floors" policy (spec §4.E).
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub chunk_min_size: u64,
    pub chunk_min_cells: u32,
    pub chunk_max_cells: u32,
    pub cell_max_size: u32,
    pub grow_factor: f32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            chunk_min_size: 1024,
            chunk_min_cells: 8,
            chunk_max_cells: 1_048_576,
            cell_max_size: 4096,
            grow_factor: 2.0,
        }
    }
}

impl PoolOptions {
    /// The largest cell count whose state bitmap still fits a `u16`-indexed
    /// array of `u64` words (`state_next`/`state_count` are `u16`).
    const MAX_STATE_INDEXABLE_CELLS: u32 = (u16::MAX as u32) * 64;

    fn clamp(mut self) -> Self {
        let min_node_size = super::block_set::node_size() as u32;
        if self.cell_max_size < min_node_size {
            self.cell_max_size = min_node_size;
        }
        if self.chunk_min_cells < 1 {
            self.chunk_min_cells = 1;
        }
        if self.chunk_max_cells < self.chunk_min_cells {
            self.chunk_max_cells = self.chunk_min_cells;
        }
        if self.chunk_max_cells > Self::MAX_STATE_INDEXABLE_CELLS {
            self.chunk_max_cells = Self::MAX_STATE_INDEXABLE_CELLS;
        }
        if self.grow_factor < 1.0 {
            self.grow_factor = 1.0;
        }
        self
    }
}

enum State {
    Uninit,
    Init {
        options: PoolOptions,
        groups: Vec<ChunkGroup>,
        blocks: BlockSet,
    },
}

/// A thread-local slab allocator. See spec §4.E and §5: a `Pool` is neither
/// `Send` nor `Sync` and must be explicitly `init`ed before use and
/// `release`d when done; there is no implicit destructor-driven teardown.
pub struct Pool {
    state: State,
}

impl Pool {
    pub fn new() -> Self {
        Pool { state: State::Uninit }
    }

    /// Idempotent: calling `init` on an already-initialized pool is a no-op
    /// (spec §4.E).
    pub fn init(&mut self, options: PoolOptions) {
        if matches!(self.state, State::Init { .. }) {
            return;
        }
        let options = options.clamp();
        let n_classes = size_class::classes_for_max(options.cell_max_size);
        let groups = (0..n_classes)
            .map(|i| {
                let cell_size = CLASSES[i];
                let initial_cells = options
                    .chunk_min_cells
                    .max((options.chunk_min_size / cell_size as u64) as u32)
                    .max(1);
                ChunkGroup::new(cell_size, initial_cells)
            })
            .collect();
        debug!("pool init: {n_classes} size classes, cell_max_size={}", options.cell_max_size);
        self.state = State::Init {
            options,
            groups,
            blocks: BlockSet::new(),
        };
    }

    fn parts(&mut self) -> Option<(&PoolOptions, &mut Vec<ChunkGroup>, &mut BlockSet)> {
        match &mut self.state {
            State::Init { options, groups, blocks } => Some((options, groups, blocks)),
            State::Uninit => None,
        }
    }

    /// `bytes == 0` is treated as `1`; `align` must be a power of two.
    /// Routes to a chunk group when `max(bytes, align) <= cell_max_size`,
    /// else to the oversize registry.
    pub fn allocate(&mut self, bytes: usize, align: usize) -> Result<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(XyError::InvalidAlign(align));
        }
        let bytes = bytes.max(1);
        let size = bytes.max(align);

        let Some((options, groups, blocks)) = self.parts() else {
            return Err(XyError::InvalidState);
        };

        if size <= options.cell_max_size as usize {
            let idx = size_class::classify(size as u32) as usize;
            groups[idx].allocate(options)
        } else {
            blocks.allocate(bytes, align)
        }
    }

    /// `p` being a null-equivalent is not representable with `NonNull`;
    /// callers that track "maybe no pointer" do so above this layer.
    /// Routes symmetrically to `allocate` by `max(bytes, align)`. A
    /// non-power-of-two `align` is misuse (spec §7): logged and ignored,
    /// never raised to the caller.
    pub fn deallocate(&mut self, p: NonNull<u8>, bytes: usize, align: usize) {
        if !align.is_power_of_two() {
            warn!("deallocate with non-power-of-two align {align}");
            return;
        }
        let bytes = bytes.max(1);
        let size = bytes.max(align);

        let Some((options, groups, blocks)) = self.parts() else {
            warn!("deallocate on an uninitialized pool");
            return;
        };

        if size <= options.cell_max_size as usize {
            let idx = size_class::classify(size as u32) as usize;
            groups[idx].deallocate(p);
        } else {
            blocks.deallocate(p, bytes, align);
        }
    }

    /// Unconditional bulk free of every chunk and block. Calling this while
    /// cells are still live is a programming error (spec §5): logged in
    /// debug builds, left undefined in release.
    pub fn release(&mut self) {
        if let State::Init { groups, blocks, .. } = &mut self.state {
            for group in groups.iter_mut() {
                group.release();
            }
            blocks.release();
        }
        self.state = State::Uninit;
    }

    pub fn options(&self) -> Option<&PoolOptions> {
        match &self.state {
            State::Init { options, .. } => Some(options),
            State::Uninit => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Init { .. })
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if matches!(self.state, State::Init { .. }) {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        pool.init(PoolOptions {
            cell_max_size: 8192,
            ..PoolOptions::default()
        });
        assert_eq!(pool.options().unwrap().cell_max_size, 4096);
        pool.release();
    }

    #[test]
    fn reuse_after_free_in_reverse_order() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        let mut ptrs = Vec::with_capacity(10_000);
        for _ in 0..10_000 {
            ptrs.push(pool.allocate(24, 8).unwrap());
        }
        for p in ptrs.drain(..).rev() {
            pool.deallocate(p, 24, 8);
        }
        let groups_before = match &pool.state {
            State::Init { groups, .. } => groups.iter().map(|g| g.chunk_count()).collect::<Vec<_>>(),
            _ => unreachable!(),
        };
        for _ in 0..10_000 {
            pool.allocate(24, 8).unwrap();
        }
        let groups_after = match &pool.state {
            State::Init { groups, .. } => groups.iter().map(|g| g.chunk_count()).collect::<Vec<_>>(),
            _ => unreachable!(),
        };
        assert_eq!(groups_before, groups_after, "no new chunk should have been created");
        pool.release();
    }

    #[test]
    fn oversize_routes_to_block_set() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        let p1 = pool.allocate(5000, 16).unwrap();
        let p2 = pool.allocate(5000, 16).unwrap();
        assert_ne!(p1, p2);
        assert_eq!(p1.as_ptr() as usize % 16, 0);
        pool.deallocate(p2, 5000, 16);
        pool.deallocate(p1, 5000, 16);
        pool.release();
    }

    #[test]
    fn alignment_is_honored_for_small_cells() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        let p = pool.allocate(1, 64).unwrap();
        assert_eq!(p.as_ptr() as usize & 63, 0);
        pool.deallocate(p, 1, 64);
        pool.release();
    }

    #[test]
    fn size_routing_boundary() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        let at_max = pool.allocate(4096, 1).unwrap();
        let over_max = pool.allocate(4097, 1).unwrap();
        pool.deallocate(at_max, 4096, 1);
        pool.deallocate(over_max, 4097, 1);
        pool.release();
    }

    #[test]
    fn allocate_before_init_is_invalid_state() {
        let mut pool = Pool::new();
        assert!(matches!(pool.allocate(8, 8), Err(XyError::InvalidState)));
    }

    #[test]
    fn allocate_with_non_power_of_two_align_is_rejected() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        assert!(matches!(pool.allocate(8, 3), Err(XyError::InvalidAlign(3))));
        pool.release();
    }

    #[test]
    fn deallocate_with_non_power_of_two_align_is_logged_and_ignored() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        let p = pool.allocate(8, 8).unwrap();
        // Must not panic; the pool logs and drops the misuse.
        pool.deallocate(p, 8, 3);
        pool.deallocate(p, 8, 8);
        pool.release();
    }

    #[test]
    fn first_chunk_is_sized_per_class_not_by_the_smallest_class() {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        // Force the 4096-byte class's first chunk into existence.
        let p = pool.allocate(4096, 1).unwrap();
        let idx = size_class::classify(4096) as usize;
        match &pool.state {
            State::Init { groups, .. } => {
                // chunk_min_size=1024, cell_size=4096 -> max(8, 1024/4096)=8,
                // not the 128 cells a cell_size=8 divisor would have produced.
                assert_eq!(groups[idx].first_chunk_cell_count(), 8);
            }
            _ => unreachable!(),
        }
        pool.deallocate(p, 4096, 1);
        pool.release();
    }
}
