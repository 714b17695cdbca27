//! A minimal capability-style cursor interface.
//!
//! The source this crate was distilled from composes iterator behavior out
//! of ten orthogonal policy classes (storage, validity, dereference,
//! increment, ...). That whole framework is out of scope (spec §1): the
//! hash table only needs one thing from it, a pull-based cursor it can
//! advance one occupied slot at a time, so that is all this module
//! provides. `HashTable::iter`/`keys`/`values` all share the same
//! `GroupCursor` (see `hash::table`) and differ only in how they project a
//! slot once the cursor lands on it — exactly the "capability interface"
//! shape spec §9 recommends in place of the ten-parameter generic.

/// Something that can be driven forward one step at a time and asked
/// whether it has more to give. Implemented once, by the hash table's
/// `GroupCursor`; kept as a trait (rather than inlined into the iterator)
/// so `keys()`/`values()`/`iter()` can each wrap the same cursor with a
/// different dereference projection.
pub trait Cursor {
    type Item;

    /// Advance to the next occupied slot, if any.
    fn advance(&mut self) -> Option<Self::Item>;
}
