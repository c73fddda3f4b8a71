//! Two-layer cache for data-set payloads
//!
//! The disk store is the durable owner of every payload; the memory cache is a
//! transient mirror with a much shorter validity window. A change detector
//! decides whether a refresh actually altered the data.

pub mod change;
mod disk;
mod memory;
mod policy;

pub use disk::{CacheError, DiskCache};
pub use memory::MemoryCache;
pub use policy::{PolicyError, StalenessPolicy, DEFAULT_DISK_TTL, DEFAULT_MEMORY_TTL};
