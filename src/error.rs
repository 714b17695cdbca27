use thiserror::Error;

/// Errors surfaced by the pool and hash table.
///
/// Misuse (freeing a foreign pointer, freeing with the wrong size/align) is
/// deliberately not a variant here: per the pool's contract it is logged via
/// `log::warn!` and the free is dropped on the floor rather than raised.
#[derive(Error, Debug)]
pub enum XyError {
    /// The underlying system allocator returned no memory.
    #[error("allocation of {bytes} bytes (align {align}) failed")]
    Alloc { bytes: usize, align: usize },

    /// A requested capacity exceeds what the structure can address.
    #[error("requested capacity {requested} exceeds limit {limit}")]
    Capacity { requested: usize, limit: usize },

    /// An operation was attempted on a pool before `init` or after `release`.
    #[error("operation attempted on an uninitialized or released pool")]
    InvalidState,

    /// `HashTable::at` was called with a key that isn't present.
    #[error("key not found")]
    KeyNotFound,

    /// `align` was not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlign(usize),
}

pub type Result<T> = std::result::Result<T, XyError>;
