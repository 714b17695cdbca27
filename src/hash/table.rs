//! HashTable (component G): an open-addressed table storing per-slot
//! metadata in 16-byte control groups, probed with the SIMD primitives in
//! [`super::group`]. See spec §4.G for the exact probing and growth rules
//! this module implements.

use std::alloc::Layout;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::ptr;

use fxhash::FxBuildHasher;

use crate::error::{Result, XyError};
use crate::hint::{likely, unlikely};
use crate::memory::{Pool, PoolOptions};
use crate::range::Cursor;

use super::bitmask::BitMask;
use super::group::{Group, DELETED, EMPTY};

const HIGH_BIT: u8 = 0x80;
const K_SHRINK_FACTOR: f64 = 0.5;
const MIN_TOTAL: usize = 16;

/// Open-addressed hash table over 16-byte SIMD-probed control groups.
///
/// Neither `Send` nor `Sync`: the table owns a [`Pool`] it allocates its
/// buffer through, and a pool is bound to one thread for its entire
/// lifetime (spec §5). `V` defaults to `()` for set-like usage.
pub struct HashTable<K, V = ()>
where
    K: Hash + Eq,
{
    pool: Pool,
    data: Option<ptr::NonNull<u8>>,
    slots_offset: usize,
    count: usize,
    total: usize,
    hash_builder: FxBuildHasher,
    _marker: PhantomData<(K, V)>,
}

enum Probe {
    Found(usize),
    Target(usize),
}

impl<K, V> HashTable<K, V>
where
    K: Hash + Eq,
{
    const MAX_TOTAL: usize = 1 << (usize::BITS - 4);

    pub fn new() -> Self {
        let mut pool = Pool::new();
        pool.init(PoolOptions::default());
        HashTable {
            pool,
            data: None,
            slots_offset: 0,
            count: 0,
            total: 0,
            hash_builder: FxBuildHasher::default(),
            _marker: PhantomData,
        }
    }

    /// `explicit HashTable(mincapa)` in the source: pre-reserves room for
    /// at least `mincapa` entries without any probing.
    pub fn with_capacity(mincapa: usize) -> Result<Self> {
        let mut table = Self::new();
        if mincapa > 0 {
            table.reserve(mincapa)?;
        }
        Ok(table)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `floor(total * 0.875)`, computed exactly since `total` is always a
    /// multiple of 8 once non-zero.
    pub fn capacity(&self) -> usize {
        self.total - self.total / 8
    }

    /// The largest capacity this table can ever grow to without overflowing
    /// internal arithmetic.
    pub fn limit() -> usize {
        Self::MAX_TOTAL - Self::MAX_TOTAL / 8
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find_slot(key).is_some()
    }

    pub fn at(&self, key: &K) -> Result<&V> {
        self.find_slot(key)
            .map(|idx| unsafe { &(*self.slot_ptr(idx)).1 })
            .ok_or(XyError::KeyNotFound)
    }

    pub fn at_mut(&mut self, key: &K) -> Result<&mut V> {
        match self.find_slot(key) {
            Some(idx) => Ok(unsafe { &mut (*self.slot_ptr(idx)).1 }),
            None => Err(XyError::KeyNotFound),
        }
    }

    /// Get-or-default-insert (spec §4.G, §9 Open Question: resolved in
    /// favor of insert-if-missing). Callers wanting strict lookup should
    /// use [`Self::at`].
    pub fn get(&mut self, key: K) -> Result<&mut V>
    where
        V: Default,
    {
        self.reserve(1)?;
        let idx = match self.find_slot_or_target(&key) {
            Probe::Found(idx) => idx,
            Probe::Target(idx) => {
                self.place(idx, key, V::default());
                idx
            }
        };
        Ok(unsafe { &mut (*self.slot_ptr(idx)).1 })
    }

    /// Idempotent: if `key` is already present, its value is returned
    /// unchanged and no write happens (spec §4.G Insert).
    pub fn insert(&mut self, key: K, value: V) -> Result<&V> {
        self.reserve(1)?;
        let idx = match self.find_slot_or_target(&key) {
            Probe::Found(idx) => idx,
            Probe::Target(idx) => {
                self.place(idx, key, value);
                idx
            }
        };
        Ok(unsafe { &(*self.slot_ptr(idx)).1 })
    }

    /// Like [`Self::insert`], but assigns over an existing match instead of
    /// leaving it unchanged.
    pub fn update(&mut self, key: K, value: V) -> Result<&V> {
        self.reserve(1)?;
        let idx = match self.find_slot_or_target(&key) {
            Probe::Found(idx) => {
                unsafe { (*self.slot_ptr(idx)).1 = value };
                idx
            }
            Probe::Target(idx) => {
                self.place(idx, key, value);
                idx
            }
        };
        Ok(unsafe { &(*self.slot_ptr(idx)).1 })
    }

    pub fn erase(&mut self, key: &K) -> bool {
        match self.find_slot(key) {
            Some(idx) => {
                unsafe {
                    ptr::drop_in_place(self.slot_ptr(idx));
                    self.meta_ptr_mut().add(idx).write(DELETED);
                }
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    /// Drops every live entry and resets every meta byte to `EMPTY`;
    /// `capacity()` (and the underlying allocation) is unchanged.
    pub fn clear(&mut self) {
        if self.total == 0 {
            return;
        }
        for i in 0..self.total {
            let meta = unsafe { *self.meta_ptr().add(i) };
            if meta & HIGH_BIT == 0 {
                unsafe { ptr::drop_in_place(self.slot_ptr(i)) };
            }
        }
        unsafe { ptr::write_bytes(self.meta_ptr_mut(), EMPTY, self.total) };
        self.count = 0;
    }

    /// Unconditional teardown: drops every live entry, frees the buffer
    /// and the pool backing it.
    pub fn release(&mut self) {
        self.clear();
        if let Some(data) = self.data.take() {
            let (layout, _) = Self::layout_for(self.total);
            self.pool.deallocate(data, layout.size(), layout.align());
        }
        self.total = 0;
        self.slots_offset = 0;
        self.pool.release();
    }

    /// Ensures room for `additional` more entries, rehashing if needed.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let need = self.count + additional;
        if need <= self.capacity() {
            return Ok(());
        }
        let new_total = self.calc_new_total(need);
        if new_total > Self::MAX_TOTAL {
            return Err(XyError::Capacity {
                requested: new_total,
                limit: Self::MAX_TOTAL,
            });
        }
        self.rehash_to(new_total)
    }

    /// Rehashes downward if `count < capacity() * 0.5`; idempotent when the
    /// condition doesn't hold.
    pub fn reduce(&mut self) -> Result<()> {
        if self.total == 0 {
            return Ok(());
        }
        if (self.count as f64) < self.capacity() as f64 * K_SHRINK_FACTOR {
            let new_total = self.calc_new_total(self.count).max(MIN_TOTAL);
            if new_total < self.total {
                self.rehash_to(new_total)?;
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        let num_groups = if self.total == 0 { 0 } else { self.total / Group::WIDTH };
        Iter {
            table: self,
            cursor: GroupCursor {
                meta_ptr: self.data.map(|d| d.as_ptr() as *const u8).unwrap_or(ptr::null()),
                base: 0,
                mask: BitMask(0),
                next_group: 0,
                num_groups,
                _marker: PhantomData,
            },
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    fn place(&mut self, idx: usize, key: K, value: V) {
        let hash = self.hash_of(&key);
        let h2 = (hash & 0x7F) as u8;
        unsafe {
            self.meta_ptr_mut().add(idx).write(h2);
            self.slot_ptr(idx).write((key, value));
        }
        self.count += 1;
    }

    fn hash_of(&self, key: &K) -> u64 {
        let mut state = self.hash_builder.build_hasher();
        key.hash(&mut state);
        state.finish()
    }

    #[inline]
    fn meta_ptr(&self) -> *const u8 {
        self.data.expect("meta_ptr called on an empty table").as_ptr()
    }

    #[inline]
    fn meta_ptr_mut(&self) -> *mut u8 {
        self.data.expect("meta_ptr_mut called on an empty table").as_ptr()
    }

    #[inline]
    unsafe fn slot_ptr(&self, idx: usize) -> *mut (K, V) {
        let base = self.data.expect("slot_ptr called on an empty table").as_ptr();
        (base.add(self.slots_offset) as *mut (K, V)).add(idx)
    }

    /// Lookup-only probe (spec §4.G "Lookup"): no insertion target is
    /// tracked.
    fn find_slot(&self, key: &K) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let hash = self.hash_of(key);
        let h2 = (hash & 0x7F) as u8;
        let num_groups = self.total / Group::WIDTH;
        let g0 = ((hash >> 7) as usize) & (num_groups - 1);
        let meta = self.meta_ptr();

        let mut g = g0;
        loop {
            let group = unsafe { Group::load(meta.add(g * Group::WIDTH)) };
            for bit in group.match_byte(h2) {
                let idx = g * Group::WIDTH + bit;
                if likely(unsafe { &(*self.slot_ptr(idx)).0 } == key) {
                    return Some(idx);
                }
            }
            if unlikely(!group.match_empty().is_empty()) {
                return None;
            }
            g = (g + 1) % num_groups;
            if g == g0 {
                return None;
            }
        }
    }

    /// Insert-oriented probe (spec §4.G "Insert"): same scan as
    /// [`Self::find_slot`], but records the first high-bit-set meta byte
    /// seen as an insertion target.
    fn find_slot_or_target(&self, key: &K) -> Probe {
        debug_assert!(self.total > 0, "caller must reserve capacity first");
        let hash = self.hash_of(key);
        let h2 = (hash & 0x7F) as u8;
        let num_groups = self.total / Group::WIDTH;
        let g0 = ((hash >> 7) as usize) & (num_groups - 1);
        let meta = self.meta_ptr();

        let mut g = g0;
        let mut target: Option<usize> = None;
        loop {
            let group = unsafe { Group::load(meta.add(g * Group::WIDTH)) };
            for bit in group.match_byte(h2) {
                let idx = g * Group::WIDTH + bit;
                if likely(unsafe { &(*self.slot_ptr(idx)).0 } == key) {
                    return Probe::Found(idx);
                }
            }
            if target.is_none() {
                if let Some(bit) = group.match_empty_or_deleted().lowest_set_bit() {
                    target = Some(g * Group::WIDTH + bit);
                }
            }
            if unlikely(!group.match_empty().is_empty()) {
                break;
            }
            g = (g + 1) % num_groups;
            if g == g0 {
                break;
            }
        }
        Probe::Target(target.expect("load factor invariant guarantees a free slot"))
    }

    fn calc_new_total(&self, min_capa: usize) -> usize {
        let needed = ((min_capa as u128 * 8 + 6) / 7) as usize;
        let t = needed.max(MIN_TOTAL).max(self.total.saturating_mul(2));
        t.next_power_of_two()
    }

    fn layout_for(total: usize) -> (Layout, usize) {
        let meta_layout = Layout::array::<u8>(total).expect("meta layout overflow");
        let slot_layout = Layout::array::<(K, V)>(total).expect("slot layout overflow");
        let (combined, slots_offset) = meta_layout.extend(slot_layout).expect("layout overflow");
        (combined.pad_to_align(), slots_offset)
    }

    /// Allocates a fresh buffer of `new_total` slots, migrates every live
    /// entry into it without re-checking equality (keys are known unique),
    /// and frees the previous buffer.
    fn rehash_to(&mut self, new_total: usize) -> Result<()> {
        let (new_layout, new_slots_offset) = Self::layout_for(new_total);
        let new_data = self.pool.allocate(new_layout.size(), new_layout.align())?;
        unsafe { ptr::write_bytes(new_data.as_ptr(), EMPTY, new_total) };

        let num_groups = new_total / Group::WIDTH;

        if let Some(old_data) = self.data {
            let old_total = self.total;
            let old_slots_offset = self.slots_offset;
            for i in 0..old_total {
                let meta = unsafe { *old_data.as_ptr().add(i) };
                if meta & HIGH_BIT != 0 {
                    continue;
                }
                let old_slot = unsafe { (old_data.as_ptr().add(old_slots_offset) as *mut (K, V)).add(i) };
                let (key, value) = unsafe { ptr::read(old_slot) };
                let hash = self.hash_of(&key);
                let h2 = (hash & 0x7F) as u8;
                let g0 = ((hash >> 7) as usize) & (num_groups - 1);

                let mut g = g0;
                let target = loop {
                    let group = unsafe { Group::load(new_data.as_ptr().add(g * Group::WIDTH)) };
                    if let Some(bit) = group.match_empty_or_deleted().lowest_set_bit() {
                        break g * Group::WIDTH + bit;
                    }
                    g = (g + 1) % num_groups;
                };

                unsafe {
                    new_data.as_ptr().add(target).write(h2);
                    (new_data.as_ptr().add(new_slots_offset) as *mut (K, V))
                        .add(target)
                        .write((key, value));
                }
            }
            let (old_layout, _) = Self::layout_for(old_total);
            self.pool.deallocate(old_data, old_layout.size(), old_layout.align());
        }

        self.data = Some(new_data);
        self.total = new_total;
        self.slots_offset = new_slots_offset;
        Ok(())
    }
}

impl<K: Hash + Eq, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> Drop for HashTable<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, V> Clone for HashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = HashTable::new();
        if self.total == 0 {
            return new_table;
        }
        new_table
            .rehash_to(self.total)
            .expect("cloning to the source's own total cannot overflow");
        for (k, v) in self.iter() {
            new_table.insert(k.clone(), v.clone()).expect("capacity already reserved");
        }
        new_table
    }

    /// Reuses the existing allocation when `source.count` fits into
    /// `[capacity() * 0.5, capacity()]`; otherwise clones fresh and swaps
    /// in (spec §4.G "Policy edge cases"). Self-assignment is a no-op.
    fn clone_from(&mut self, source: &Self) {
        if ptr::eq(self, source) {
            return;
        }
        let reuse = self.total > 0
            && source.count as f64 >= self.capacity() as f64 * K_SHRINK_FACTOR
            && source.count <= self.capacity();
        if reuse {
            self.clear();
            for (k, v) in source.iter() {
                self.insert(k.clone(), v.clone()).expect("reserved capacity already sufficient");
            }
        } else {
            *self = source.clone();
        }
    }
}

impl<K, V> HashTable<K, V>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
{
    /// Renders the table through the abstract streaming sink from spec §6,
    /// rather than assuming the destination is a `String` or a `Formatter`.
    fn write_into<S: crate::fmt::Sink>(&self, sink: &mut S) -> fmt::Result {
        sink.write_str("{")?;
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                sink.write_str(", ")?;
            }
            first = false;
            sink.write_str(&format!("{k:?}: {v:?}"))?;
        }
        sink.write_str("}")
    }
}

impl<K, V> fmt::Debug for HashTable<K, V>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_into(f)
    }
}

/// A pull-based cursor over occupied slots (spec §4.G "Iteration" /
/// §9 "Coroutine-like iteration").
struct GroupCursor<'a, K, V> {
    meta_ptr: *const u8,
    base: usize,
    mask: BitMask,
    next_group: usize,
    num_groups: usize,
    _marker: PhantomData<&'a (K, V)>,
}

impl<'a, K, V> Cursor for GroupCursor<'a, K, V> {
    type Item = usize;

    fn advance(&mut self) -> Option<usize> {
        loop {
            if let Some(bit) = self.mask.lowest_set_bit() {
                self.mask = self.mask.remove_lowest_bit();
                return Some(self.base + bit);
            }
            if self.next_group >= self.num_groups {
                return None;
            }
            let group = unsafe { Group::load(self.meta_ptr.add(self.next_group * Group::WIDTH)) };
            let occupied = !group.match_empty_or_deleted().0 & 0xFFFF;
            self.mask = BitMask(occupied);
            self.base = self.next_group * Group::WIDTH;
            self.next_group += 1;
        }
    }
}

pub struct Iter<'a, K, V> {
    table: &'a HashTable<K, V>,
    cursor: GroupCursor<'a, K, V>,
}

impl<'a, K: Hash + Eq, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor.advance()?;
        let slot = unsafe { &*self.table.slot_ptr(idx) };
        Some((&slot.0, &slot.1))
    }
}
