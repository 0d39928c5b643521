//! Local pull cache.
//!
//! Each destination directory records the manifest digest it was last
//! populated from in a single marker file. A pull whose resolved digest
//! equals the recorded one can skip all further network I/O.
//!
//! The marker is not guarded by a lock: two concurrent pulls into the same
//! destination may race, so callers must serialize them.

pub mod entry;

pub use entry::{is_cached, read, write, CacheEntry, CACHE_FILE_NAME};

/// Base-name prefix reserved for cache bookkeeping; never packed into archives.
pub const RESERVED_PREFIX: &str = ".klaus-";
