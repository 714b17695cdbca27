#![cfg_attr(feature = "nightly", feature(core_intrinsics))]

//! A thread-local block memory pool and a SIMD-probed Swiss hash table.
//!
//! The two subsystems are coupled: [`hash::HashTable`] allocates its backing
//! buffer through a [`memory::Pool`] it owns. Neither type is `Send` or
//! `Sync`; a pool and any table built over it live on one thread for their
//! entire lifetime (see the crate's design notes on concurrency).

/// Errors surfaced by the pool and the hash table.
pub mod error;
/// Abstract streaming sink the hash table's formatter writes through.
pub mod fmt;
/// The block memory pool: size classes, chunks, chunk groups, and the
/// oversize registry.
pub mod memory;
/// The Swiss hash table: control groups, SIMD probing, and the table itself.
pub mod hash;
/// A minimal pull-based cursor capability used by hash table iteration.
pub mod range;

/// Branch-prediction hints used in pool and hash table hot paths.
mod hint;

pub use error::{Result, XyError};
pub use hash::HashTable;
pub use memory::{Pool, PoolOptions};
