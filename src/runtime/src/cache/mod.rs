//! Build cache.
//!
//! - `BuildCache`: persisted layer name → build result, validated against
//!   the current layer specification on every lookup
//! - `LayerSpecs`: shared handle on the specifications the cache hashes

pub mod build_cache;
pub mod imports;
pub mod specs;

pub use build_cache::{BuildCache, CacheEntry, CachedOutput, CACHE_FORMAT_VERSION};
pub use imports::hash_import;
pub use specs::LayerSpecs;
