//! The block memory pool (components A-E): a thread-local slab allocator
//! that classifies requests into size classes, serves small objects from
//! chunked pools, and falls back to a hashed registry for oversize
//! requests.

mod block_set;
mod chunk;
mod chunk_group;
mod pool;
pub mod size_class;

pub use pool::{Pool, PoolOptions};
